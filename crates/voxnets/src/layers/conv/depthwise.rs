//! # Depthwise Convolution
//!
//! A grouped convolution with one group per input channel; each channel is
//! convolved with `depth_multiplier` private filters.

use crate::compat::conv_shape::PaddingMode;
use crate::geometry::Geometry;
use crate::layers::conv::conv_nd::{ConvNd, ConvNdConfig, ConvNdMeta};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`DepthwiseConv`] Config.
#[derive(Config, Debug)]
pub struct DepthwiseConvConfig {
    /// Input channels.
    pub channels: usize,

    /// Filters per input channel.
    #[config(default = 1)]
    pub depth_multiplier: usize,

    /// Kernel size, one entry per spatial dim.
    pub kernel_size: Vec<usize>,

    /// Stride; defaults to 1 in every dim.
    #[config(default = "None")]
    pub stride: Option<Vec<usize>>,

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Add a bias.
    #[config(default = false)]
    pub bias: bool,
}

impl DepthwiseConvConfig {
    /// The grouped [`ConvNdConfig`] this config describes.
    pub fn conv_config(&self) -> ConvNdConfig {
        ConvNdConfig::new(
            self.channels,
            self.channels * self.depth_multiplier,
            self.kernel_size.clone(),
        )
        .with_stride(self.stride.clone())
        .with_padding(self.padding)
        .with_groups(self.channels)
        .with_bias(self.bias)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.channels == 0 || self.depth_multiplier == 0 {
            return Err(format!(
                "channels ({}) and depth multiplier ({}) must be positive",
                self.channels, self.depth_multiplier
            ));
        }
        self.conv_config().try_validate()
    }

    /// Propagate a [`Geometry`] through this convolution.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Geometry {
        self.conv_config().output_geometry(input)
    }

    /// Initialize a [`DepthwiseConv`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DepthwiseConv<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
        DepthwiseConv {
            conv: self.conv_config().init(device),
        }
    }
}

/// Depthwise convolution of any spatial rank.
#[derive(Module, Debug)]
pub struct DepthwiseConv<B: Backend> {
    /// The grouped convolution.
    pub conv: ConvNd<B>,
}

impl<B: Backend> DepthwiseConv<B> {
    /// Input channels.
    pub fn channels(&self) -> usize {
        self.conv.in_channels()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels * depth_multiplier, out_spatial...]``
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.conv.forward(input)
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
    fn test_depthwise_3d_shapes() {
        let device = Default::default();
        let config = DepthwiseConvConfig::new(4, vec![3, 3, 3])
            .with_depth_multiplier(2)
            .with_stride(Some(vec![1, 2, 2]));
        let conv: DepthwiseConv<B> = config.init(&device);
        assert_eq!(conv.channels(), 4);
        assert_eq!(conv.out_channels(), 8);

        let input: Tensor<B, 5> = Tensor::random([2, 4, 5, 8, 8], Distribution::Default, &device);
        let geometry = config.output_geometry(&Geometry::new(vec![5, 8, 8], &[1]));
        let output = conv.forward(input);
        assert_eq!(output.dims()[..2], [2, 8]);
        assert_eq!(output.dims()[2..].to_vec(), geometry.shape);
    }

    #[test]
    fn test_channels_are_independent() {
        let device = Default::default();
        let conv: DepthwiseConv<B> = DepthwiseConvConfig::new(2, vec![3, 3]).init(&device);

        let input: Tensor<B, 4> = Tensor::random([1, 2, 5, 5], Distribution::Default, &device);
        let zeroed = Tensor::cat(
            vec![
                input.clone().slice([0..1, 0..1, 0..5, 0..5]),
                Tensor::zeros([1, 1, 5, 5], &device),
            ],
            1,
        );

        let full = conv.forward(input).slice([0..1, 0..1, 0..5, 0..5]);
        let partial = conv.forward(zeroed).slice([0..1, 0..1, 0..5, 0..5]);
        assert_tensors_close(full, partial, 1e-6);
    }

    #[test]
    fn test_validate() {
        assert!(
            DepthwiseConvConfig::new(0, vec![3])
                .try_validate()
                .is_err()
        );
        assert!(
            DepthwiseConvConfig::new(3, vec![2, 2])
                .try_validate()
                .is_err()
        );
    }
}
