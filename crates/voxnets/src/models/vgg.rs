//! # `VGG`
//!
//! Stages of conv passes and max pooling, followed by a fully connected
//! classifier. Works for 1 to 4 spatial dims.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::geometry::{Geometry, broadcast_dims};
use crate::layers::blocks::conv_pass::{ConvPass, ConvPassConfig};
use crate::layers::sampling::pool::{MaxPoolNd, MaxPoolNdConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Vgg`] Config.
#[derive(Config, Debug)]
pub struct VggConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Per-stage downsample factors.
    pub downsample_factors: Vec<Vec<usize>>,

    /// Spatial shape of the input.
    pub input_shape: Vec<usize>,

    /// Fmaps of the first stage.
    #[config(default = 64)]
    pub num_fmaps: usize,

    /// Fmap multiplier between stages; one entry, or one per stage after the first.
    #[config(default = "vec![2]")]
    pub fmap_inc_factors: Vec<usize>,

    /// Convolutions per stage.
    #[config(default = 2)]
    pub num_conv_passes: usize,

    /// Kernel size of every convolution; a single entry broadcasts.
    #[config(default = "vec![3]")]
    pub kernel_size: Vec<usize>,

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Width of the hidden fully connected layers.
    #[config(default = 4096)]
    pub fc_size: usize,

    /// Number of hidden fully connected layers.
    #[config(default = 2)]
    pub num_fc: usize,

    /// Dropout after each hidden fully connected layer.
    #[config(default = 0.5)]
    pub dropout: f64,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,

    /// Optional normalization in the conv passes.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// Voxel size of the input; aligned with the trailing dims.
    #[config(default = "vec![1]")]
    pub voxel_size: Vec<usize>,
}

/// A resolved [`VggConfig`].
#[derive(Debug, Clone)]
pub struct VggPlan {
    /// Conv pass of every stage.
    pub stages: Vec<ConvPassConfig>,

    /// Pooling of every stage.
    pub pools: Vec<MaxPoolNdConfig>,

    /// Geometry after the last pooling.
    pub output: Geometry,

    /// Flattened feature size fed to the classifier.
    pub features: usize,
}

impl VggConfig {
    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.input_shape.len()
    }

    /// Fmaps of every stage.
    pub fn stage_fmaps(&self) -> Vec<usize> {
        let stages = self.downsample_factors.len();
        let inc = broadcast_dims(&self.fmap_inc_factors, stages.saturating_sub(1));
        (0..stages)
            .map(|stage| self.num_fmaps * inc[..stage].iter().product::<usize>())
            .collect()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        let n = self.spatial_dims();
        if !(1..=4).contains(&n) {
            return Err(format!(
                "vgg supports 1 to 4 spatial dims, got {:?}",
                self.input_shape
            ));
        }
        if self.downsample_factors.is_empty() || self.num_conv_passes == 0 {
            return Err("vgg needs at least one stage and one conv per stage".to_string());
        }
        if self.downsample_factors.iter().any(|f| f.len() != n) {
            return Err(format!(
                "downsample factors {:?} must have {n} dims",
                self.downsample_factors
            ));
        }
        let stages = self.downsample_factors.len();
        if stages > 1 && ![1, stages - 1].contains(&self.fmap_inc_factors.len()) {
            return Err(format!(
                "expected 1 or {} fmap increase factors, got {:?}",
                stages - 1,
                self.fmap_inc_factors
            ));
        }
        if ![1, n].contains(&self.kernel_size.len()) {
            return Err(format!(
                "kernel size {:?} must have 1 or {n} dims",
                self.kernel_size
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(format!("invalid dropout: {}", self.dropout));
        }
        Ok(())
    }

    /// Resolve every stage against the input geometry.
    pub fn plan(&self) -> Result<VggPlan, String> {
        self.try_validate()?;
        let kernel_size = broadcast_dims(&self.kernel_size, self.spatial_dims());

        let mut stages = vec![];
        let mut pools = vec![];
        let mut in_channels = self.in_channels;
        let mut geometry = Geometry::try_new(self.input_shape.clone(), &self.voxel_size)?;
        for (stage, (fmaps, factors)) in self
            .stage_fmaps()
            .into_iter()
            .zip(&self.downsample_factors)
            .enumerate()
        {
            let pass = ConvPassConfig::new(
                in_channels,
                fmaps,
                vec![kernel_size.clone(); self.num_conv_passes],
            )
            .with_padding(self.padding)
            .with_norm(self.norm.clone())
            .with_act(Some(self.act.clone()));
            pass.try_validate()?;
            geometry = pass.try_output_geometry(&geometry)?;
            geometry = geometry.try_conv(factors, factors, &[1], PaddingMode::Valid)?;
            tracing::debug!(
                stage,
                fmaps,
                shape = ?geometry.shape,
                fov = ?geometry.fov,
                "planned vgg stage"
            );

            stages.push(pass);
            pools.push(MaxPoolNdConfig::new(factors.clone()));
            in_channels = fmaps;
        }

        let features = in_channels * geometry.num_voxels();
        tracing::info!(
            shape = ?geometry.shape,
            fov = ?geometry.fov,
            voxel_size = ?geometry.voxel_size,
            features,
            "planned vgg"
        );
        Ok(VggPlan {
            stages,
            pools,
            output: geometry,
            features,
        })
    }

    /// Initialize a [`Vgg`].
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Vgg<B>, String> {
        let plan = self.plan()?;

        let mut fc = Vec::with_capacity(self.num_fc);
        let mut width = plan.features;
        for _ in 0..self.num_fc {
            fc.push(LinearConfig::new(width, self.fc_size).init(device));
            width = self.fc_size;
        }

        Ok(Vgg {
            stages: plan.stages.iter().map(|pass| pass.init(device)).collect(),
            pools: plan.pools.iter().map(|pool| pool.init()).collect(),
            fc,
            act: self.act.init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(width, self.num_classes).init(device),
        })
    }

    /// Initialize a [`Vgg`].
    ///
    /// # Panics
    ///
    /// If the config cannot be planned.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Vgg<B> {
        match self.try_init(device) {
            Ok(model) => model,
            Err(err) => panic!("{err}"),
        }
    }
}

/// `VGG` classifier.
#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    /// Conv pass of every stage.
    pub stages: Vec<ConvPass<B>>,

    /// Pooling of every stage.
    pub pools: Vec<MaxPoolNd>,

    /// Hidden fully connected layers.
    pub fc: Vec<Linear<B>>,

    /// Activation of the hidden layers.
    pub act: Activation<B>,

    /// Dropout of the hidden layers.
    pub dropout: Dropout,

    /// Classifier.
    pub classifier: Linear<B>,
}

impl<B: Backend> Vgg<B> {
    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        self.classifier.weight.shape().dims[1]
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
        let x = self
            .stages
            .iter()
            .zip(&self.pools)
            .fold(input, |x, (pass, pool)| pool.forward(pass.forward(x)));

        let x: Tensor<B, 2> = x.flatten(1, D - 1);
        let x = self.fc.iter().fold(x, |x, fc| {
            self.dropout.forward(self.act.forward(fc.forward(x)))
        });
        self.classifier.forward(x)
    }
}
