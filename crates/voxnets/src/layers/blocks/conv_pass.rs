//! # Conv Pass
//!
//! A sequence of [`Cna`] layers: the first maps `in_channels` to
//! `out_channels`, the rest keep `out_channels`. One layer per kernel size.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::geometry::Geometry;
use crate::layers::blocks::cna::{Cna, CnaConfig};
use crate::layers::conv::conv_nd::{ConvNdConfig, ConvNdMeta};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvPass`] Config.
#[derive(Config, Debug)]
pub struct ConvPassConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    pub out_channels: usize,

    /// One kernel size per layer.
    pub kernel_sizes: Vec<Vec<usize>>,

    /// Padding policy.
    #[config(default = "PaddingMode::Valid")]
    pub padding: PaddingMode,

    /// Optional normalization after each conv.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// Activation after each conv.
    #[config(default = "Some(ActivationConfig::Relu)")]
    pub act: Option<ActivationConfig>,
}

impl ConvPassConfig {
    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.kernel_sizes.first().map_or(0, |k| k.len())
    }

    /// The per-layer [`CnaConfig`]s.
    pub fn layer_configs(&self) -> Vec<CnaConfig> {
        self.kernel_sizes
            .iter()
            .enumerate()
            .map(|(i, kernel_size)| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                CnaConfig::new(
                    ConvNdConfig::new(in_channels, self.out_channels, kernel_size.clone())
                        .with_padding(self.padding),
                )
                .with_norm(self.norm.clone())
                .with_act(self.act.clone())
                .match_norm_features()
            })
            .collect()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.kernel_sizes.is_empty() {
            return Err("a conv pass needs at least one kernel size".to_string());
        }
        let n = self.spatial_dims();
        if self.kernel_sizes.iter().any(|k| k.len() != n) {
            return Err(format!(
                "kernel sizes must have the same rank: {:?}",
                self.kernel_sizes
            ));
        }
        self.layer_configs()
            .iter()
            .try_for_each(|layer| layer.conv.try_validate())
    }

    /// Fold a [`Geometry`] through every layer.
    ///
    /// # Returns
    ///
    /// An error if a ``valid`` kernel does not fit.
    pub fn try_output_geometry(
        &self,
        input: &Geometry,
    ) -> Result<Geometry, String> {
        self.kernel_sizes
            .iter()
            .try_fold(input.clone(), |geometry, kernel_size| {
                geometry.try_conv(kernel_size, &[1], &[1], self.padding)
            })
    }

    /// Initialize a [`ConvPass`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvPass<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
        ConvPass {
            layers: self
                .layer_configs()
                .into_iter()
                .map(|layer| layer.init(device))
                .collect(),
        }
    }
}

/// Repeated conv/norm/act layers.
#[derive(Module, Debug)]
pub struct ConvPass<B: Backend> {
    /// The layers.
    pub layers: Vec<Cna<B>>,
}

impl<B: Backend> ConvPass<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.layers[0].in_channels()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.layers[self.layers.len() - 1].out_channels()
    }

    /// Forward pass.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.layers
            .iter()
            .fold(input, |x, layer| layer.forward(x))
    }
}
