//! # `EfficientNet` Model
//!
//! Stem, scaled [`MbConv`] blocks, top conv, global pooling and a linear
//! classifier.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::geometry::Geometry;
use crate::layers::blocks::cna::{Cna, CnaConfig};
use crate::layers::conv::conv_nd::ConvNdConfig;
use crate::layers::sampling::global_pool::global_average_pool;
use crate::models::efficientnet::mb_conv::{EFFICIENTNET_BN_EPSILON, MbConv, MbConvConfig};
use crate::models::efficientnet::prefabs::{
    EfficientNetVariant, MbBlockArgs, STEM_FILTERS, TOP_FILTERS, default_block_args,
    round_filters, round_repeats,
};
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Tensor};

/// Per-dim stride; time (the first of 4 dims) is never strided.
fn spatial_stride(
    stride: usize,
    spatial_dims: usize,
) -> Vec<usize> {
    let mut strides = vec![stride; spatial_dims];
    if spatial_dims == 4 {
        strides[0] = 1;
    }
    strides
}

/// [`EfficientNet`] Config.
#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Spatial shape of the input.
    pub input_shape: Vec<usize>,

    /// Channel multiplier.
    #[config(default = 1.0)]
    pub width_coefficient: f64,

    /// Block repeat multiplier.
    #[config(default = 1.0)]
    pub depth_coefficient: f64,

    /// Dropout before the classifier.
    #[config(default = 0.2)]
    pub dropout: f64,

    /// Drop connect rate of the last block; earlier blocks scale linearly.
    #[config(default = 0.2)]
    pub drop_connect_rate: f64,

    /// Filter rounding divisor.
    #[config(default = 8)]
    pub depth_divisor: usize,

    /// The unscaled block table.
    #[config(default = "default_block_args()")]
    pub blocks: Vec<MbBlockArgs>,

    /// Activation.
    #[config(default = "ActivationConfig::Silu")]
    pub act: ActivationConfig,

    /// Voxel size of the input; aligned with the trailing dims.
    #[config(default = "vec![1]")]
    pub voxel_size: Vec<usize>,
}

/// A resolved [`EfficientNetConfig`].
#[derive(Debug, Clone)]
pub struct EfficientNetPlan {
    /// Stem convolution.
    pub stem: CnaConfig,

    /// Every block, in order.
    pub blocks: Vec<MbConvConfig>,

    /// Top convolution.
    pub top: CnaConfig,

    /// Geometry after the top convolution.
    pub output: Geometry,
}

impl EfficientNetConfig {
    /// A config scaled like `variant`.
    pub fn from_variant(
        variant: EfficientNetVariant,
        in_channels: usize,
        num_classes: usize,
        input_shape: Vec<usize>,
    ) -> Self {
        let coefficients = variant.coefficients();
        Self::new(in_channels, num_classes, input_shape)
            .with_width_coefficient(coefficients.width)
            .with_depth_coefficient(coefficients.depth)
            .with_dropout(coefficients.dropout)
    }

    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.input_shape.len()
    }

    fn filters(
        &self,
        filters: usize,
    ) -> usize {
        round_filters(filters, self.width_coefficient, self.depth_divisor)
    }

    fn norm(&self) -> NormalizationConfig {
        NormalizationConfig::batch(EFFICIENTNET_BN_EPSILON)
    }

    /// The total number of blocks after depth scaling.
    pub fn num_blocks(&self) -> usize {
        self.blocks
            .iter()
            .map(|args| round_repeats(args.num_repeat, self.depth_coefficient))
            .sum()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if !(1..=4).contains(&self.spatial_dims()) {
            return Err(format!(
                "efficientnet supports 1 to 4 spatial dims, got {:?}",
                self.input_shape
            ));
        }
        if self.blocks.is_empty() {
            return Err("efficientnet needs at least one block".to_string());
        }
        if self.width_coefficient <= 0.0 || self.depth_coefficient <= 0.0 {
            return Err(format!(
                "scaling coefficients must be positive: width {}, depth {}",
                self.width_coefficient, self.depth_coefficient
            ));
        }
        if self.depth_divisor == 0 {
            return Err("depth divisor must be positive".to_string());
        }
        for rate in [self.dropout, self.drop_connect_rate] {
            if !(0.0..1.0).contains(&rate) {
                return Err(format!("invalid dropout rate: {rate}"));
            }
        }
        Ok(())
    }

    /// Resolve every block against the input geometry.
    pub fn plan(&self) -> Result<EfficientNetPlan, String> {
        self.try_validate()?;
        let n = self.spatial_dims();

        let stem = CnaConfig::new(
            ConvNdConfig::new(self.in_channels, self.filters(STEM_FILTERS), vec![3; n])
                .with_stride(Some(spatial_stride(2, n)))
                .with_bias(false),
        )
        .with_norm(Some(self.norm()))
        .with_act(Some(self.act.clone()))
        .match_norm_features();
        stem.conv.try_validate()?;
        let mut geometry = Geometry::try_new(self.input_shape.clone(), &self.voxel_size)?;
        geometry = stem.conv.try_output_geometry(&geometry)?;

        let total = self.num_blocks();
        let mut blocks = Vec::with_capacity(total);
        for args in &self.blocks {
            let in_filters = self.filters(args.in_filters);
            let out_filters = self.filters(args.out_filters);

            for repeat in 0..round_repeats(args.num_repeat, self.depth_coefficient) {
                let index = blocks.len();
                let block = MbConvConfig::new(
                    if repeat == 0 { in_filters } else { out_filters },
                    out_filters,
                    vec![args.kernel_size; n],
                    spatial_stride(if repeat == 0 { args.stride } else { 1 }, n),
                )
                .with_expand_ratio(args.expand_ratio)
                .with_se_ratio(Some(args.se_ratio))
                .with_drop_connect(self.drop_connect_rate * index as f64 / total as f64)
                .with_act(self.act.clone())
                .with_norm(self.norm());
                block.try_validate()?;

                geometry = block.output_geometry(&geometry);
                tracing::debug!(
                    index,
                    in_channels = block.in_channels,
                    out_channels = block.out_channels,
                    shape = ?geometry.shape,
                    fov = ?geometry.fov,
                    voxel_size = ?geometry.voxel_size,
                    "planned mbconv block"
                );
                blocks.push(block);
            }
        }

        let last_filters = blocks
            .last()
            .map_or(stem.conv.out_channels, |block| block.out_channels);
        let top = CnaConfig::new(
            ConvNdConfig::new(last_filters, self.filters(TOP_FILTERS), vec![1; n])
                .with_bias(false),
        )
        .with_norm(Some(self.norm()))
        .with_act(Some(self.act.clone()))
        .match_norm_features();

        tracing::info!(
            blocks = blocks.len(),
            shape = ?geometry.shape,
            fov = ?geometry.fov,
            voxel_size = ?geometry.voxel_size,
            "planned efficientnet"
        );
        Ok(EfficientNetPlan {
            stem,
            blocks,
            top,
            output: geometry,
        })
    }

    /// Initialize an [`EfficientNet`].
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<EfficientNet<B>, String> {
        let plan = self.plan()?;
        let top_filters = plan.top.conv.out_channels;
        let model = EfficientNet {
            stem: plan.stem.init(device),
            blocks: plan.blocks.iter().map(|block| block.init(device)).collect(),
            top: plan.top.init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc: LinearConfig::new(top_filters, self.num_classes).init(device),
        };
        tracing::info!(
            params = model.num_params(),
            fc_params = model.fc.num_params(),
            "initialized efficientnet"
        );
        Ok(model)
    }

    /// Initialize an [`EfficientNet`].
    ///
    /// # Panics
    ///
    /// If the config cannot be planned.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> EfficientNet<B> {
        match self.try_init(device) {
            Ok(model) => model,
            Err(err) => panic!("{err}"),
        }
    }
}

/// `EfficientNet` classifier.
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    /// Stem convolution.
    pub stem: Cna<B>,

    /// Blocks.
    pub blocks: Vec<MbConv<B>>,

    /// Top convolution.
    pub top: Cna<B>,

    /// Dropout before the classifier.
    pub dropout: Dropout,

    /// Classifier.
    pub fc: Linear<B>,
}

impl<B: Backend> EfficientNet<B> {
    /// Pooled features, before dropout and the classifier.
    pub fn features<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, 2> {
        let x = self.stem.forward(input);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        global_average_pool(self.top.forward(x))
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, 2> {
        self.fc.forward(self.dropout.forward(self.features(input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::{ShapeContract, shape_contract};
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    fn tiny_blocks() -> Vec<MbBlockArgs> {
        vec![
            MbBlockArgs::new(3, 1, 32, 16, 1, 1),
            MbBlockArgs::new(3, 2, 16, 24, 6, 2),
        ]
    }

    #[test]
    fn test_plan_b0() {
        let config = EfficientNetConfig::from_variant(EfficientNetVariant::B0, 3, 1000, vec![224, 224]);
        let plan = config.plan().unwrap();

        assert_eq!(plan.blocks.len(), 16);
        assert_eq!(plan.stem.conv.out_channels, 32);
        assert_eq!(plan.top.conv.in_channels, 320);
        assert_eq!(plan.top.conv.out_channels, 1280);
        assert_eq!(plan.output.shape, vec![7, 7]);
        assert_eq!(plan.output.voxel_size, vec![32, 32]);

        assert_eq!(plan.blocks[0].drop_connect, 0.0);
        assert_eq!(plan.blocks[8].drop_connect, 0.1);
        assert!(plan.blocks[0].expand_ratio == 1 && plan.blocks[1].expand_ratio == 6);
        assert!(!plan.blocks[1].has_skip());
        assert!(plan.blocks[2].has_skip());
    }

    #[test]
    fn test_plan_scaled_variants() {
        let config = EfficientNetConfig::from_variant(EfficientNetVariant::B7, 3, 10, vec![64, 64]);
        assert_eq!(config.dropout, 0.5);
        assert_eq!(config.num_blocks(), 55);

        let plan = config.plan().unwrap();
        assert_eq!(plan.stem.conv.out_channels, 64);
        assert_eq!(plan.top.conv.out_channels, 2560);

        let plan = EfficientNetConfig::from_variant(EfficientNetVariant::B4, 3, 10, vec![64, 64])
            .plan()
            .unwrap();
        assert_eq!(plan.stem.conv.out_channels, 48);
        assert_eq!(plan.top.conv.out_channels, 1792);
    }

    #[test]
    fn test_plan_4d_keeps_time() {
        let config = EfficientNetConfig::new(1, 2, vec![3, 16, 16, 16]).with_blocks(tiny_blocks());
        let plan = config.plan().unwrap();
        assert_eq!(plan.stem.conv.stride, Some(vec![1, 2, 2, 2]));
        assert_eq!(plan.output.shape, vec![3, 4, 4, 4]);
    }

    #[test]
    fn test_plan_errors() {
        let config = EfficientNetConfig::new(3, 10, vec![32, 32]).with_blocks(vec![]);
        assert!(config.plan().is_err());

        let config = EfficientNetConfig::new(3, 10, vec![32, 32]).with_dropout(1.5);
        assert!(config.plan().is_err());

        let config = EfficientNetConfig::new(3, 10, vec![2; 5]);
        assert!(config.plan().is_err());
    }

    #[test]
    fn test_plan_geometry_errors() {
        let config = EfficientNetConfig::new(3, 10, vec![32, 32]).with_voxel_size(vec![1, 1, 1]);
        assert!(config.plan().unwrap_err().contains("more dims than shape"));

        let config = EfficientNetConfig::new(3, 10, vec![32, 32]).with_voxel_size(vec![0]);
        assert!(config.plan().unwrap_err().contains("must be positive"));
    }

    #[test]
    fn test_forward_2d() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = EfficientNetConfig::new(3, 4, vec![32, 32])
            .with_width_coefficient(0.25)
            .with_blocks(tiny_blocks());
        let model: EfficientNet<B> = config.init(&device);
        assert_eq!(model.blocks.len(), 3);

        let input: Tensor<B, 4> = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        static CONTRACT: ShapeContract = shape_contract!["batch", "features"];
        CONTRACT.assert_shape(&model.features(input.clone()), &[("batch", 2), ("features", 320)]);
        assert_eq!(model.forward(input).dims(), [2, 4]);
    }

    #[test]
    fn test_forward_3d() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = EfficientNetConfig::new(1, 2, vec![8, 8, 8])
            .with_width_coefficient(0.25)
            .with_blocks(tiny_blocks());
        let model: EfficientNet<B> = config.init(&device);

        let input: Tensor<B, 5> = Tensor::random([1, 1, 8, 8, 8], Distribution::Default, &device);
        assert_eq!(model.forward(input).dims(), [1, 2]);
    }
}
