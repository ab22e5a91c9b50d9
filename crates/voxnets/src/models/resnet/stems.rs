//! # `ResNet` Stem
//!
//! The input convolution: ``conv(+act) -> [norm] -> act``.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::geometry::Geometry;
use crate::layers::blocks::cna::{Cna, CnaConfig};
use crate::layers::conv::conv_nd::{ConvNdConfig, ConvNdMeta};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Fmaps of the stem conv.
pub const STEM_FMAPS: usize = 64;

/// Spatial kernel of the stem conv.
pub const STEM_KERNEL_SIZE: usize = 7;

/// The stem kernel for `spatial_dims` dims.
///
/// `lifted_frames` is the frame count of an input whose channels were lifted
/// into a leading time dim; that time extent is capped by it:
/// ``[min(frames, 7), 7, 7, 7]``. Native inputs get 7 in every dim.
pub fn stem_kernel_size(
    spatial_dims: usize,
    lifted_frames: Option<usize>,
) -> Vec<usize> {
    let mut kernel_size = vec![STEM_KERNEL_SIZE; spatial_dims];
    if let Some(frames) = lifted_frames {
        kernel_size[0] = frames.min(STEM_KERNEL_SIZE);
    }
    kernel_size
}

/// [`ResNetStem`] Config.
#[derive(Config, Debug)]
pub struct ResNetStemConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Kernel size.
    pub kernel_size: Vec<usize>,

    /// Output fmaps.
    #[config(default = "STEM_FMAPS")]
    pub fmaps: usize,

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

impl ResNetStemConfig {
    fn conv_config(&self) -> CnaConfig {
        CnaConfig::new(
            ConvNdConfig::new(self.in_channels, self.fmaps, self.kernel_size.clone())
                .with_padding(self.padding),
        )
        .with_act(Some(self.act.clone()))
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        self.conv_config().conv.try_validate()
    }

    /// Propagate a [`Geometry`] through the stem.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Result<Geometry, String> {
        self.conv_config().conv.try_output_geometry(input)
    }

    /// Initialize a [`ResNetStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetStem<B> {
        ResNetStem {
            conv: self.conv_config().init(device),
            norm: self
                .norm
                .clone()
                .map(|norm| norm.with_num_features(self.fmaps).init(device)),
            act: self.act.init(device),
        }
    }
}

/// `ResNet` input block.
#[derive(Module, Debug)]
pub struct ResNetStem<B: Backend> {
    /// Activated conv.
    pub conv: Cna<B>,

    /// Optional norm.
    pub norm: Option<Normalization<B>>,

    /// Activation.
    pub act: Activation<B>,
}

impl<B: Backend> ResNetStem<B> {
    /// Output fmaps.
    pub fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    /// Forward pass.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.act.forward(x)
    }
}
