//! # Mobile Inverted Bottleneck
//!
//! [`MbConv`]:
//! * optional 1x1 expansion (conv/norm/act),
//! * depthwise conv with stride (norm/act),
//! * [`SqueezeExcitation`],
//! * 1x1 projection (conv/norm),
//! * identity skip with drop connect, when the block keeps its shape.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::geometry::Geometry;
use crate::layers::blocks::cna::{Cna, CnaConfig};
use crate::layers::conv::conv_nd::{ConvNd, ConvNdConfig};
use crate::layers::conv::depthwise::{DepthwiseConv, DepthwiseConvConfig};
use crate::layers::drop::drop_path::{DropPath, DropPathConfig};
use crate::layers::sampling::global_pool::global_average_pool;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::sigmoid;

/// Batch norm epsilon of `EfficientNet` blocks.
pub const EFFICIENTNET_BN_EPSILON: f64 = 1e-3;

/// [`SqueezeExcitation`] Config.
#[derive(Config, Debug)]
pub struct SqueezeExcitationConfig {
    /// Channels of the excited feature map.
    pub channels: usize,

    /// Channels of the squeezed bottleneck.
    pub squeezed_channels: usize,

    /// Number of spatial dims.
    pub spatial_dims: usize,

    /// Activation of the bottleneck.
    #[config(default = "ActivationConfig::Silu")]
    pub act: ActivationConfig,
}

impl SqueezeExcitationConfig {
    /// Initialize a [`SqueezeExcitation`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SqueezeExcitation<B> {
        let kernel = vec![1; self.spatial_dims];
        SqueezeExcitation {
            reduce: ConvNdConfig::new(self.channels, self.squeezed_channels, kernel.clone())
                .init(device),
            expand: ConvNdConfig::new(self.squeezed_channels, self.channels, kernel).init(device),
            act: self.act.init(device),
        }
    }
}

/// Channel gating from globally pooled features.
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    /// 1x1 reduction.
    pub reduce: ConvNd<B>,

    /// 1x1 expansion.
    pub expand: ConvNd<B>,

    /// Bottleneck activation.
    pub act: Activation<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// `input`, scaled per channel by a gate in ``(0, 1)``.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let [batch, channels] = {
            let dims = input.dims();
            [dims[0], dims[1]]
        };
        let squeezed_shape: [usize; D] = core::array::from_fn(|i| match i {
            0 => batch,
            1 => channels,
            _ => 1,
        });

        let s: Tensor<B, D> = global_average_pool(input.clone()).reshape(squeezed_shape);
        let s = self.act.forward(self.reduce.forward(s));
        let s = sigmoid(self.expand.forward(s));

        input * s
    }
}

/// [`MbConv`] Config.
#[derive(Config, Debug)]
pub struct MbConvConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    pub out_channels: usize,

    /// Depthwise kernel size, one entry per spatial dim.
    pub kernel_size: Vec<usize>,

    /// Depthwise stride, one entry per spatial dim.
    pub stride: Vec<usize>,

    /// Expansion ratio.
    #[config(default = 1)]
    pub expand_ratio: usize,

    /// Squeeze and excitation ratio, relative to `in_channels`.
    #[config(default = "Some(0.25)")]
    pub se_ratio: Option<f64>,

    /// Drop connect probability of the skip branch.
    #[config(default = 0.0)]
    pub drop_connect: f64,

    /// Allow the identity skip.
    #[config(default = true)]
    pub id_skip: bool,

    /// Activation.
    #[config(default = "ActivationConfig::Silu")]
    pub act: ActivationConfig,

    /// Normalization.
    #[config(default = "NormalizationConfig::batch(EFFICIENTNET_BN_EPSILON)")]
    pub norm: NormalizationConfig,
}

impl MbConvConfig {
    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.kernel_size.len()
    }

    /// Channels of the expanded feature map.
    pub fn expanded_channels(&self) -> usize {
        self.in_channels * self.expand_ratio
    }

    /// Channels of the squeeze and excitation bottleneck, if any.
    pub fn squeezed_channels(&self) -> Option<usize> {
        self.se_ratio
            .filter(|&ratio| ratio > 0.0 && ratio <= 1.0)
            .map(|ratio| ((self.in_channels as f64 * ratio) as usize).max(1))
    }

    /// Does the block add its input back?
    pub fn has_skip(&self) -> bool {
        self.id_skip
            && self.in_channels == self.out_channels
            && self.stride.iter().all(|&s| s == 1)
    }

    fn depthwise_config(&self) -> DepthwiseConvConfig {
        DepthwiseConvConfig::new(self.expanded_channels(), self.kernel_size.clone())
            .with_stride(Some(self.stride.clone()))
            .with_padding(PaddingMode::Same)
    }

    fn pointwise_config(
        &self,
        in_channels: usize,
        out_channels: usize,
        act: bool,
    ) -> CnaConfig {
        CnaConfig::new(
            ConvNdConfig::new(in_channels, out_channels, vec![1; self.spatial_dims()])
                .with_bias(false),
        )
        .with_norm(Some(self.norm.clone()))
        .with_act(act.then(|| self.act.clone()))
        .match_norm_features()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stride.len() != self.spatial_dims() {
            return Err(format!(
                "stride {:?} does not match kernel size {:?}",
                self.stride, self.kernel_size
            ));
        }
        if self.expand_ratio == 0 {
            return Err("expand ratio must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.drop_connect) {
            return Err(format!("invalid drop connect rate: {}", self.drop_connect));
        }
        self.depthwise_config().try_validate()
    }

    /// Propagate a [`Geometry`] through the block.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Geometry {
        self.depthwise_config().output_geometry(input)
    }

    /// Initialize a [`MbConv`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MbConv<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
        let expanded = self.expanded_channels();
        MbConv {
            expand: (self.expand_ratio != 1)
                .then(|| self.pointwise_config(self.in_channels, expanded, true).init(device)),
            depthwise: self.depthwise_config().init(device),
            depthwise_norm: self.norm.clone().with_num_features(expanded).init(device),
            depthwise_act: self.act.init(device),
            se: self.squeezed_channels().map(|squeezed| {
                SqueezeExcitationConfig::new(expanded, squeezed, self.spatial_dims())
                    .with_act(self.act.clone())
                    .init(device)
            }),
            project: self
                .pointwise_config(expanded, self.out_channels, false)
                .init(device),
            drop_path: self
                .has_skip()
                .then(|| DropPathConfig::new().with_drop_prob(self.drop_connect).init()),
        }
    }
}

/// Mobile inverted bottleneck block.
#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    /// Optional 1x1 expansion.
    pub expand: Option<Cna<B>>,

    /// Depthwise convolution.
    pub depthwise: DepthwiseConv<B>,

    /// Norm after the depthwise convolution.
    pub depthwise_norm: Normalization<B>,

    /// Activation after the depthwise convolution.
    pub depthwise_act: Activation<B>,

    /// Optional squeeze and excitation.
    pub se: Option<SqueezeExcitation<B>>,

    /// 1x1 projection, without activation.
    pub project: Cna<B>,

    /// Drop connect of the skip; present iff the block has a skip.
    pub drop_path: Option<DropPath>,
}

impl<B: Backend> MbConv<B> {
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
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.depthwise.forward(x);
        let x = self.depthwise_act.forward(self.depthwise_norm.forward(x));

        let x = match &self.se {
            Some(se) => se.forward(x),
            None => x,
        };

        let x = self.project.forward(x);

        match &self.drop_path {
            Some(drop_path) => drop_path.forward(x) + input,
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_tensors_close;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_config() {
        let config = MbConvConfig::new(16, 24, vec![3, 3], vec![2, 2]).with_expand_ratio(6);
        assert_eq!(config.expanded_channels(), 96);
        assert_eq!(config.squeezed_channels(), Some(4));
        assert!(!config.has_skip());

        let geometry = config.output_geometry(&Geometry::new(vec![15, 16], &[1]));
        assert_eq!(geometry.shape, vec![8, 8]);
        assert_eq!(geometry.fov, vec![3, 3]);
        assert_eq!(geometry.voxel_size, vec![2, 2]);

        let config = MbConvConfig::new(2, 2, vec![3], vec![1]).with_se_ratio(Some(0.25));
        assert_eq!(config.squeezed_channels(), Some(1));
        assert!(config.has_skip());
        assert!(!config.clone().with_id_skip(false).has_skip());
        assert_eq!(config.with_se_ratio(None).squeezed_channels(), None);
    }

    #[test]
    fn test_validate() {
        assert!(
            MbConvConfig::new(4, 4, vec![3, 3], vec![1])
                .try_validate()
                .is_err()
        );
        assert!(
            MbConvConfig::new(4, 4, vec![4, 4], vec![1, 1])
                .try_validate()
                .is_err()
        );
        assert!(
            MbConvConfig::new(4, 4, vec![3, 3], vec![1, 1])
                .with_drop_connect(1.0)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();

        let block: MbConv<B> = MbConvConfig::new(4, 6, vec![3, 3], vec![2, 2])
            .with_expand_ratio(6)
            .init(&device);
        assert!(block.expand.is_some());
        assert!(block.se.is_some());
        assert!(block.drop_path.is_none());

        let input: Tensor<B, 4> = Tensor::random([2, 4, 9, 8], Distribution::Default, &device);
        assert_eq!(block.forward(input).dims(), [2, 6, 5, 4]);

        let block: MbConv<B> = MbConvConfig::new(3, 3, vec![1, 3, 3], vec![1, 1, 1])
            .with_drop_connect(0.5)
            .init(&device);
        assert!(block.expand.is_none());
        assert!(block.drop_path.is_some());

        let input: Tensor<B, 5> = Tensor::random([1, 3, 2, 5, 5], Distribution::Default, &device);
        assert_eq!(block.forward(input).dims(), [1, 3, 2, 5, 5]);
    }

    #[test]
    fn test_skip_adds_input() {
        let device = Default::default();
        let block: MbConv<B> = MbConvConfig::new(2, 2, vec![3], vec![1])
            .with_se_ratio(None)
            .init(&device);
        let block = MbConv {
            project: Cna {
                conv: match block.project.conv {
                    ConvNd::Conv1d(mut conv) => {
                        conv.weight = conv.weight.map(|w| w.zeros_like());
                        ConvNd::Conv1d(conv)
                    }
                    conv => conv,
                },
                ..block.project
            },
            ..block
        };

        // Zero projection weights leave the normalized zeros; the batch norm
        // bias starts at 0, so the output is the input.
        let input: Tensor<B, 3> = Tensor::random([2, 2, 7], Distribution::Default, &device);
        assert_tensors_close(block.forward(input.clone()), input, 1e-6);
    }

    #[test]
    fn test_squeeze_excitation_gates() {
        let device = Default::default();
        let se: SqueezeExcitation<B> = SqueezeExcitationConfig::new(4, 2, 3).init(&device);

        let input: Tensor<B, 5> = Tensor::ones([2, 4, 2, 3, 3], &device);
        let output = se.forward(input);
        assert_eq!(output.dims(), [2, 4, 2, 3, 3]);

        let values: Vec<f32> = output.into_data().to_vec().unwrap();
        assert!(values.iter().all(|&v| v > 0.0 && v < 1.0));
    }
}
