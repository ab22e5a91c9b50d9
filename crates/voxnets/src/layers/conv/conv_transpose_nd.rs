//! # Learned upsampling.
//!
//! [`ConvTransposeNd`] is a transposed convolution with
//! ``kernel_size == stride == factors``; each input voxel is expanded into a
//! ``factors`` sized block, so ``out_shape = in_shape * factors``.

use crate::compat::rank::{cast_rank, to_array};
use burn::nn::conv::{
    ConvTranspose1d, ConvTranspose1dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    ConvTranspose3d, ConvTranspose3dConfig,
};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvTransposeNd`] Config.
#[derive(Config, Debug)]
pub struct ConvTransposeNdConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    pub out_channels: usize,

    /// Per-dim upsampling factors; 1 to 3 dims.
    pub factors: Vec<usize>,
}

impl ConvTransposeNdConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if !(1..=3).contains(&self.factors.len()) {
            return Err(format!(
                "transposed convolutions support 1 to 3 spatial dims, got factors {:?}",
                self.factors
            ));
        }
        if self.factors.contains(&0) {
            return Err(format!("factors must be positive: {:?}", self.factors));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`ConvTransposeNd`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvTransposeNd<B> {
        self.expect_valid();
        let channels = [self.in_channels, self.out_channels];
        let factors = &self.factors;
        match factors.len() {
            1 => ConvTransposeNd::ConvTranspose1d(
                ConvTranspose1dConfig::new(channels, factors[0])
                    .with_stride(factors[0])
                    .init(device),
            ),
            2 => ConvTransposeNd::ConvTranspose2d(
                ConvTranspose2dConfig::new(channels, to_array(factors))
                    .with_stride(to_array(factors))
                    .init(device),
            ),
            _ => ConvTransposeNd::ConvTranspose3d(
                ConvTranspose3dConfig::new(channels, to_array(factors))
                    .with_stride(to_array(factors))
                    .init(device),
            ),
        }
    }
}

/// Transposed convolution over 1 to 3 spatial dims.
#[derive(Module, Debug)]
pub enum ConvTransposeNd<B: Backend> {
    /// 1 spatial dim.
    ConvTranspose1d(ConvTranspose1d<B>),

    /// 2 spatial dims.
    ConvTranspose2d(ConvTranspose2d<B>),

    /// 3 spatial dims.
    ConvTranspose3d(ConvTranspose3d<B>),
}

impl<B: Backend> ConvTransposeNd<B> {
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
        match self {
            Self::ConvTranspose1d(conv) => {
                cast_rank(conv.forward(cast_rank::<B, D, 3>(input)))
            }
            Self::ConvTranspose2d(conv) => {
                cast_rank(conv.forward(cast_rank::<B, D, 4>(input)))
            }
            Self::ConvTranspose3d(conv) => {
                cast_rank(conv.forward(cast_rank::<B, D, 5>(input)))
            }
        }
    }
}
