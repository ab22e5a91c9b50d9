//! # Upsampling layers.
//!
//! [`Upsample`] grows the spatial shape by `factors` and maps channels:
//! * [`UpsampleMode::Transposed`] - learned transposed convolution (1 to 3 dims),
//! * [`UpsampleMode::Constant`] - nearest repeat followed by a 1x1 conv (any dims).

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::geometry::Geometry;
use crate::layers::conv::conv_nd::{ConvNd, ConvNdConfig};
use crate::layers::conv::conv_transpose_nd::{ConvTransposeNd, ConvTransposeNdConfig};
use crate::layers::sampling::repeat::repeat_nearest;
use burn::module::Ignored;
use burn::prelude::{Backend, Config, Module, Tensor};
use serde::{Deserialize, Serialize};

/// How [`Upsample`] grows the feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpsampleMode {
    /// Transposed convolution with ``kernel == stride == factors``.
    #[default]
    Transposed,

    /// Nearest neighbour repeat, then a 1x1 convolution.
    Constant,
}

/// [`Upsample`] Config.
#[derive(Config, Debug)]
pub struct UpsampleConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    pub out_channels: usize,

    /// Per-dim upsampling factors.
    pub factors: Vec<usize>,

    /// Upsampling mode.
    #[config(default = "UpsampleMode::Transposed")]
    pub mode: UpsampleMode,

    /// Optional activation.
    #[config(default = "None")]
    pub act: Option<ActivationConfig>,
}

impl UpsampleConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        match self.mode {
            UpsampleMode::Transposed => self.transposed_config().try_validate(),
            UpsampleMode::Constant => {
                if self.factors.is_empty() || self.factors.contains(&0) {
                    return Err(format!("invalid upsampling factors {:?}", self.factors));
                }
                self.projection_config().try_validate()
            }
        }
    }

    fn transposed_config(&self) -> ConvTransposeNdConfig {
        ConvTransposeNdConfig::new(self.in_channels, self.out_channels, self.factors.clone())
    }

    fn projection_config(&self) -> ConvNdConfig {
        ConvNdConfig::new(
            self.in_channels,
            self.out_channels,
            vec![1; self.factors.len()],
        )
    }

    /// Propagate a [`Geometry`] through the upsampling.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Geometry {
        input.upsample(&self.factors)
    }

    /// Initialize an [`Upsample`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Upsample<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
        let (transposed, projection) = match self.mode {
            UpsampleMode::Transposed => (Some(self.transposed_config().init(device)), None),
            UpsampleMode::Constant => (None, Some(self.projection_config().init(device))),
        };
        Upsample {
            transposed,
            projection,
            factors: Ignored(self.factors.clone()),
            act: self.act.as_ref().map(|act| act.init(device)),
        }
    }
}

/// Spatial upsampling with a channel mapping.
#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    /// Learned upsampling; [`UpsampleMode::Transposed`].
    pub transposed: Option<ConvTransposeNd<B>>,

    /// 1x1 channel projection; [`UpsampleMode::Constant`].
    pub projection: Option<ConvNd<B>>,

    /// Per-dim factors.
    pub factors: Ignored<Vec<usize>>,

    /// Optional activation.
    pub act: Option<Activation<B>>,
}

impl<B: Backend> Upsample<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, spatial * factors...]``
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let x = match (&self.transposed, &self.projection) {
            (Some(transposed), _) => transposed.forward(input),
            (None, Some(projection)) => projection.forward(repeat_nearest(input, &self.factors)),
            (None, None) => repeat_nearest(input, &self.factors),
        };
        match &self.act {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}
