//! # `ResNet` Model
//!
//! [`ResNetConfig::plan`] resolves the network against the input geometry,
//! logging every block; [`ResNetConfig::init`] builds the [`ResNet`].
//!
//! The network is:
//! * a [`ResNetStem`],
//! * one [`ResidualStack`] per entry of `num_blocks`; every stack but the
//!   last halves the resolution,
//! * a final norm and activation,
//! * global average pooling and a linear classifier.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::{
    CLASSIFIER_BATCH_NORM_EPSILON, Normalization, NormalizationConfig,
};
use crate::geometry::Geometry;
use crate::layers::sampling::global_pool::global_average_pool;
use crate::models::resnet::prefabs::ResNetSize;
use crate::models::resnet::stack::{ResidualStack, ResidualStackConfig, ResidualStackOptions};
use crate::models::resnet::stems::{ResNetStem, ResNetStemConfig, STEM_FMAPS, stem_kernel_size};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Number of classes.
    pub num_classes: usize,

    /// Spatial shape of the input.
    pub input_shape: Vec<usize>,

    /// Voxel size of the input; aligned with the trailing dims.
    #[config(default = "vec![1]")]
    pub voxel_size: Vec<usize>,

    /// A well known depth; takes precedence over `num_blocks`.
    #[config(default = "None")]
    pub size: Option<ResNetSize>,

    /// Blocks per stack.
    #[config(default = "None")]
    pub num_blocks: Option<Vec<usize>>,

    /// Use bottleneck blocks; required with `num_blocks`.
    #[config(default = "None")]
    pub use_bottleneck: Option<bool>,

    /// Inner fmaps per stack.
    #[config(default = "vec![64, 128, 256, 512]")]
    pub num_fmaps: Vec<usize>,

    /// Fmaps of the stem conv.
    #[config(default = "STEM_FMAPS")]
    pub stem_fmaps: usize,

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Keep the third-to-last dim unstrided until roughly isotropic.
    #[config(default = false)]
    pub make_iso: bool,

    /// Collapse time once `voxel_size[-1]` reaches this size.
    #[config(default = "None")]
    pub merge_time_voxel_size: Option<usize>,

    /// Use batch norm.
    #[config(default = false)]
    pub use_batchnorm: bool,

    /// Lift the channel axis of 3d inputs into a time axis, and use 4d convs.
    #[config(default = false)]
    pub use_conv4d: bool,

    /// Dropout after each strided conv.
    #[config(default = 0.0)]
    pub dropout: f64,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

/// A resolved [`ResNetConfig`].
#[derive(Debug, Clone)]
pub struct ResNetPlan {
    /// Geometry entering the stem.
    pub input: Geometry,

    /// The stem.
    pub stem: ResNetStemConfig,

    /// Geometry after the stem.
    pub stem_output: Geometry,

    /// The stacks.
    pub stacks: Vec<ResidualStackConfig>,

    /// Geometry entering the classifier.
    pub output: Geometry,

    /// Features entering the classifier.
    pub features: usize,
}

impl ResNetConfig {
    /// Blocks per stack, and whether they are bottlenecks.
    pub fn resolve_blocks(&self) -> Result<(Vec<usize>, bool), String> {
        match (self.size, &self.num_blocks, self.use_bottleneck) {
            (Some(size), _, _) => Ok((size.num_blocks(), size.use_bottleneck())),
            (None, Some(num_blocks), Some(use_bottleneck)) => {
                Ok((num_blocks.clone(), use_bottleneck))
            }
            _ => Err("set either size or num_blocks and use_bottleneck".to_string()),
        }
    }

    fn norm(&self) -> Option<NormalizationConfig> {
        self.use_batchnorm
            .then(|| NormalizationConfig::batch(CLASSIFIER_BATCH_NORM_EPSILON))
    }

    /// The geometry entering the stem.
    ///
    /// With `use_conv4d`, the input channels become the leading (time) dim.
    pub fn input_geometry(&self) -> Result<Geometry, String> {
        let shape = if self.use_conv4d {
            core::iter::once(self.in_channels)
                .chain(self.input_shape.iter().copied())
                .collect()
        } else {
            self.input_shape.clone()
        };
        Geometry::try_new(shape, &self.voxel_size)
    }

    /// Resolve every block against the input geometry.
    pub fn plan(&self) -> Result<ResNetPlan, String> {
        let (num_blocks, use_bottleneck) = self.resolve_blocks()?;
        if num_blocks.is_empty() || self.num_fmaps.len() < num_blocks.len() {
            return Err(format!(
                "num_fmaps {:?} must cover num_blocks {num_blocks:?}",
                self.num_fmaps
            ));
        }
        if self.use_conv4d && self.input_shape.len() != 3 {
            return Err(format!(
                "use_conv4d requires a 3d input shape, got {:?}",
                self.input_shape
            ));
        }

        let input = self.input_geometry()?;
        let (stem_in_channels, lifted_frames) = if self.use_conv4d {
            (1, Some(self.in_channels))
        } else {
            (self.in_channels, None)
        };
        let stem = ResNetStemConfig::new(
            stem_in_channels,
            stem_kernel_size(input.spatial_dims(), lifted_frames),
        )
        .with_fmaps(self.stem_fmaps)
        .with_padding(self.padding)
        .with_norm(self.norm())
        .with_act(self.act.clone());
        stem.try_validate()?;

        let stem_output = stem.output_geometry(&input)?;
        tracing::info!(
            kernel_size = ?stem.kernel_size,
            shape = ?stem_output.shape,
            fov = ?stem_output.fov,
            "planned resnet stem"
        );

        let last = num_blocks.len() - 1;
        let mut geometry = stem_output.clone();
        let mut channels = stem.fmaps;
        let mut stacks = Vec::with_capacity(num_blocks.len());
        for (idx, &blocks) in num_blocks.iter().enumerate() {
            let options = ResidualStackOptions::new(self.num_fmaps[idx], blocks)
                .with_stride1(if idx == last { 1 } else { 2 })
                .with_use_bottleneck(use_bottleneck)
                .with_is_first_stack(idx == 0)
                .with_padding(self.padding)
                .with_make_iso(self.make_iso)
                .with_merge_time_voxel_size(self.merge_time_voxel_size)
                .with_dropout(self.dropout)
                .with_norm(self.norm())
                .with_act(self.act.clone());

            let (stack, output) = ResidualStackConfig::plan(&options, channels, &geometry)?;
            tracing::info!(
                stack = idx + 1,
                blocks,
                out_channels = stack.out_channels(),
                shape = ?output.shape,
                fov = ?output.fov,
                voxel_size = ?output.voxel_size,
                "planned residual stack"
            );

            channels = stack.out_channels();
            geometry = output;
            stacks.push(stack);
        }

        tracing::info!(fov = ?geometry.fov, "field of view");
        tracing::info!(voxel_size = ?geometry.voxel_size, "final voxel size");

        Ok(ResNetPlan {
            input,
            stem,
            stem_output,
            stacks,
            output: geometry,
            features: channels,
        })
    }

    /// Initialize a [`ResNet`].
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<ResNet<B>, String> {
        let plan = self.plan()?;

        let model = ResNet {
            stem: plan.stem.init(device),
            stacks: plan
                .stacks
                .iter()
                .map(|stack| stack.init(device))
                .collect(),
            out_norm: self
                .norm()
                .map(|norm| norm.with_num_features(plan.features).init(device)),
            out_act: self.act.init(device),
            fc: LinearConfig::new(plan.features, self.num_classes).init(device),
            lift_channels_to_time: self.use_conv4d,
        };

        let num_params_conv = model.stem.num_params()
            + model.stacks.num_params()
            + model.out_norm.num_params();
        let num_params_fc = model.fc.num_params();
        tracing::info!(
            conv = num_params_conv,
            fc = num_params_fc,
            total = num_params_conv + num_params_fc,
            "number of parameters"
        );

        Ok(model)
    }

    /// Initialize a [`ResNet`].
    ///
    /// # Panics
    ///
    /// If the config cannot be planned.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        match self.try_init(device) {
            Ok(model) => model,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Pre-activation `ResNet` classifier.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Input block.
    pub stem: ResNetStem<B>,

    /// Residual stacks.
    pub stacks: Vec<ResidualStack<B>>,

    /// Final norm.
    pub out_norm: Option<Normalization<B>>,

    /// Final activation.
    pub out_act: Activation<B>,

    /// Classifier.
    pub fc: Linear<B>,

    /// Reshape ``[b, c, z, y, x]`` inputs to ``[b, 1, c, z, y, x]``.
    pub lift_channels_to_time: bool,
}

impl<B: Backend> ResNet<B> {
    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.fc.weight.shape().dims[1]
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
        if self.lift_channels_to_time {
            let dims = input.dims().to_vec();
            assert_eq!(
                dims.len(),
                5,
                "lifting channels into time requires [batch, channels, depth, height, width], got {dims:?}"
            );
            let x: Tensor<B, 6> = input.reshape([dims[0], 1, dims[1], dims[2], dims[3], dims[4]]);
            self.classify(x)
        } else {
            self.classify(input)
        }
    }

    fn classify<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, 2> {
        let x = self.stem.forward(input);
        let x = self
            .stacks
            .iter()
            .fold(x, |x, stack| stack.forward(x));
        let x = match &self.out_norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = self.out_act.forward(x);
        self.fc.forward(global_average_pool(x))
    }
}
