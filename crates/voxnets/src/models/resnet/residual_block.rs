//! # Residual Block
//!
//! A [`ResidualBlock`] is a pre-activation residual unit:
//!
//! ```text
//! x -> [merge time] -+-> [norm] -> act -> convs -> (+) -> out
//!                    |                              ^
//!                    +-------- shortcut ------------+
//! ```
//!
//! * [`BlockKind::Basic`]: ``3x3 -> 3x3``.
//! * [`BlockKind::Bottleneck`]: ``1x1 -> 3x3 -> 1x1``, with ``out = 4 * fmaps``.
//!
//! The strides are applied by the ``3x3`` conv. The shortcut is a strided
//! ``1x1`` conv, a strided subsample, or the identity; it is center cropped
//! to the residual's spatial shape before the add.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::geometry::Geometry;
use crate::layers::blocks::cna::{Cna, CnaConfig};
use crate::layers::conv::conv_nd::{ConvNd, ConvNdConfig};
use crate::layers::sampling::crop::crop_spatial;
use crate::layers::sampling::pool::{MaxPoolNd, MaxPoolNdConfig};
use crate::utility::probability::try_probability;
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use serde::{Deserialize, Serialize};

/// The residual branch layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockKind {
    /// ``3x3 -> 3x3``.
    #[default]
    Basic,

    /// ``1x1 -> 3x3 -> 1x1``.
    Bottleneck,
}

impl BlockKind {
    /// Output channels per inner fmap.
    pub fn expansion(&self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => 4,
        }
    }

    /// Index of the strided conv in the residual branch.
    pub fn stride_layer(&self) -> usize {
        match self {
            BlockKind::Basic => 0,
            BlockKind::Bottleneck => 1,
        }
    }
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Inner fmaps.
    pub fmaps: usize,

    /// Per-dim strides.
    pub strides: Vec<usize>,

    /// Residual branch layout.
    #[config(default = "BlockKind::Basic")]
    pub kind: BlockKind,

    /// Use a ``1x1`` conv shortcut.
    #[config(default = false)]
    pub conv_shortcut: bool,

    /// Normalize and activate the block input.
    #[config(default = true)]
    pub pre_activation: bool,

    /// Dropout after the strided conv.
    #[config(default = 0.0)]
    pub dropout: f64,

    /// Collapse this many frames with a ``[frames, 1, 1, 1]`` valid conv first.
    #[config(default = "None")]
    pub merge_time_frames: Option<usize>,

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Optional normalization.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl ResidualBlockConfig {
    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.strides.len()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.fmaps * self.kind.expansion()
    }

    /// Is any dim strided?
    pub fn is_strided(&self) -> bool {
        self.strides.iter().any(|&s| s > 1)
    }

    fn merge_time_config(&self) -> Option<CnaConfig> {
        self.merge_time_frames.map(|frames| {
            let mut kernel_size = vec![1; self.spatial_dims()];
            kernel_size[0] = frames;
            CnaConfig::new(
                ConvNdConfig::new(self.in_channels, self.in_channels, kernel_size)
                    .with_padding(PaddingMode::Valid),
            )
            .with_act(Some(self.act.clone()))
        })
    }

    fn shortcut_conv_config(&self) -> ConvNdConfig {
        ConvNdConfig::new(
            self.in_channels,
            self.out_channels(),
            vec![1; self.spatial_dims()],
        )
        .with_stride(Some(self.strides.clone()))
        .with_padding(self.padding)
    }

    /// The residual branch convs.
    pub fn layer_configs(&self) -> Vec<CnaConfig> {
        let n = self.spatial_dims();
        let inner = |in_channels: usize, out_channels: usize, kernel: usize, strided: bool| {
            let conv = ConvNdConfig::new(in_channels, out_channels, vec![kernel; n])
                .with_padding(self.padding)
                .with_bias(self.norm.is_none());
            let conv = if strided {
                conv.with_stride(Some(self.strides.clone()))
            } else {
                conv
            };
            CnaConfig::new(conv)
                .with_norm(self.norm.clone())
                .with_act(Some(self.act.clone()))
                .match_norm_features()
        };
        let last = |in_channels: usize, kernel: usize| {
            CnaConfig::new(
                ConvNdConfig::new(in_channels, self.out_channels(), vec![kernel; n])
                    .with_padding(self.padding),
            )
            .with_act(None)
        };

        match self.kind {
            BlockKind::Basic => vec![
                inner(self.in_channels, self.fmaps, 3, true),
                last(self.fmaps, 3),
            ],
            BlockKind::Bottleneck => vec![
                inner(self.in_channels, self.fmaps, 1, false),
                inner(self.fmaps, self.fmaps, 3, true),
                last(self.fmaps, 1),
            ],
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        let n = self.spatial_dims();
        if !(1..=4).contains(&n) || self.strides.contains(&0) {
            return Err(format!("invalid strides {:?}", self.strides));
        }
        if !self.conv_shortcut && self.in_channels != self.out_channels() {
            return Err(format!(
                "an identity shortcut needs in_channels ({}) == out_channels ({})",
                self.in_channels,
                self.out_channels()
            ));
        }
        if self.merge_time_frames.is_some() && n != 4 {
            return Err("merging time requires 4 spatial dims".to_string());
        }
        try_probability(self.dropout)?;
        self.layer_configs()
            .iter()
            .try_for_each(|layer| layer.conv.try_validate())
    }

    /// Propagate a [`Geometry`] through the residual branch.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Result<Geometry, String> {
        let geometry = match &self.merge_time_config() {
            Some(merge) => merge.conv.try_output_geometry(input)?,
            None => input.clone(),
        };
        self.layer_configs()
            .iter()
            .try_fold(geometry, |geometry, layer| {
                layer.conv.try_output_geometry(&geometry)
            })
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        let (shortcut_conv, shortcut_pool) = if self.conv_shortcut {
            (Some(self.shortcut_conv_config().init(device)), None)
        } else if self.is_strided() {
            (
                None,
                Some(MaxPoolNdConfig::subsample(self.strides.clone()).init()),
            )
        } else {
            (None, None)
        };

        let (pre_norm, pre_act) = if self.pre_activation {
            (
                self.norm
                    .clone()
                    .map(|norm| norm.with_num_features(self.in_channels).init(device)),
                Some(self.act.init(device)),
            )
        } else {
            (None, None)
        };

        ResidualBlock {
            merge_time: self.merge_time_config().map(|merge| merge.init(device)),
            shortcut_conv,
            shortcut_pool,
            pre_norm,
            pre_act,
            layers: self
                .layer_configs()
                .into_iter()
                .map(|layer| layer.init(device))
                .collect(),
            dropout: (self.dropout > 0.0).then(|| DropoutConfig::new(self.dropout).init()),
            stride_layer: self.kind.stride_layer(),
        }
    }
}

/// Pre-activation residual block.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    /// Optional time merge.
    pub merge_time: Option<Cna<B>>,

    /// ``1x1`` conv shortcut.
    pub shortcut_conv: Option<ConvNd<B>>,

    /// Strided subsample shortcut.
    pub shortcut_pool: Option<MaxPoolNd>,

    /// Pre-activation norm.
    pub pre_norm: Option<Normalization<B>>,

    /// Pre-activation.
    pub pre_act: Option<Activation<B>>,

    /// Residual branch.
    pub layers: Vec<Cna<B>>,

    /// Dropout after the strided conv.
    pub dropout: Option<Dropout>,

    /// Index of the strided conv.
    pub stride_layer: usize,
}

impl<B: Backend> ResidualBlock<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_spatial...]``
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let x = match &self.merge_time {
            Some(merge) => merge.forward(input),
            None => input,
        };

        let shortcut = match (&self.shortcut_conv, &self.shortcut_pool) {
            (Some(conv), _) => conv.forward(x.clone()),
            (None, Some(pool)) => pool.forward(x.clone()),
            (None, None) => x.clone(),
        };

        let x = match &self.pre_norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = match &self.pre_act {
            Some(act) => act.forward(x),
            None => x,
        };

        let x = self
            .layers
            .iter()
            .enumerate()
            .fold(x, |x, (idx, layer)| {
                let x = layer.forward(x);
                match &self.dropout {
                    Some(dropout) if idx == self.stride_layer => dropout.forward(x),
                    _ => x,
                }
            });

        let shape = x.dims()[2..].to_vec();
        x + crop_spatial(shortcut, &shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::{ShapeContract, shape_contract};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_layer_configs() {
        let config = ResidualBlockConfig::new(16, 8, vec![2, 2])
            .with_kind(BlockKind::Bottleneck)
            .with_conv_shortcut(true);
        assert_eq!(config.out_channels(), 32);

        let layers = config.layer_configs();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].conv.kernel_size, vec![1, 1]);
        assert_eq!(layers[0].conv.effective_stride(), vec![1, 1]);
        assert_eq!(layers[1].conv.kernel_size, vec![3, 3]);
        assert_eq!(layers[1].conv.effective_stride(), vec![2, 2]);
        assert_eq!(layers[2].conv.out_channels, 32);
        assert!(layers[2].act.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(
            ResidualBlockConfig::new(16, 8, vec![1, 1])
                .try_validate()
                .unwrap_err()
                .contains("identity shortcut")
        );
        assert!(
            ResidualBlockConfig::new(8, 8, vec![1, 1])
                .with_merge_time_frames(Some(3))
                .try_validate()
                .is_err()
        );
        assert!(
            ResidualBlockConfig::new(8, 8, vec![1, 1])
                .with_dropout(2.0)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_basic_identity() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let config = ResidualBlockConfig::new(4, 4, vec![1, 1])
            .with_norm(Some(NormalizationConfig::batch(1e-5)));
        let block: ResidualBlock<B> = config.init(&device);
        assert!(block.shortcut_conv.is_none());
        assert!(block.shortcut_pool.is_none());

        let input: Tensor<B, 4> = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = block.forward(input);
        static CONTRACT: ShapeContract = shape_contract!["batch", "channels", "height", "width"];
        CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("channels", 4),
                ("height", 8),
                ("width", 8),
            ],
        );
    }

    #[test]
    fn test_bottleneck_strided_3d() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResidualBlockConfig::new(4, 2, vec![1, 2, 2])
            .with_kind(BlockKind::Bottleneck)
            .with_conv_shortcut(true)
            .with_pre_activation(false)
            .with_dropout(0.1);
        let block: ResidualBlock<B> = config.init(&device);
        assert!(block.pre_act.is_none());
        assert!(block.dropout.is_some());

        let geometry = config
            .output_geometry(&Geometry::new(vec![4, 8, 8], &[1]))
            .unwrap();
        assert_eq!(geometry.shape, vec![4, 4, 4]);
        assert_eq!(geometry.voxel_size, vec![1, 2, 2]);
        assert_eq!(geometry.fov, vec![3, 3, 3]);

        let input: Tensor<B, 5> = Tensor::random([1, 4, 4, 8, 8], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [1, 8, 4, 4, 4]);
    }

    #[test]
    fn test_strided_identity_subsamples() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResidualBlockConfig::new(2, 2, vec![2]);
        let block: ResidualBlock<B> = config.init(&device);
        assert!(block.shortcut_pool.is_some());

        let input: Tensor<B, 3> = Tensor::random([1, 2, 9], Distribution::Default, &device);
        assert_eq!(block.forward(input).dims(), [1, 2, 5]);
    }

    #[test]
    fn test_valid_padding_crops_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResidualBlockConfig::new(2, 2, vec![1, 1]).with_padding(PaddingMode::Valid);
        let block: ResidualBlock<B> = config.init(&device);

        let geometry = config
            .output_geometry(&Geometry::new(vec![10, 10], &[1]))
            .unwrap();
        assert_eq!(geometry.shape, vec![6, 6]);
        assert_eq!(geometry.fov, vec![5, 5]);

        let input: Tensor<B, 4> = Tensor::random([1, 2, 10, 10], Distribution::Default, &device);
        assert_eq!(block.forward(input).dims(), [1, 2, 6, 6]);
    }

    #[test]
    fn test_merge_time_4d() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResidualBlockConfig::new(2, 2, vec![1, 2, 2, 2])
            .with_conv_shortcut(true)
            .with_merge_time_frames(Some(3));
        let block: ResidualBlock<B> = config.init(&device);
        assert!(block.merge_time.is_some());

        let geometry = config
            .output_geometry(&Geometry::new(vec![3, 4, 4, 4], &[1]))
            .unwrap();
        assert_eq!(geometry.shape, vec![1, 2, 2, 2]);
        assert_eq!(geometry.fov, vec![7, 7, 7, 7]);

        let input: Tensor<B, 6> =
            Tensor::random([1, 2, 3, 4, 4, 4], Distribution::Default, &device);
        assert_eq!(block.forward(input).dims(), [1, 2, 1, 2, 2, 2]);
    }
}
