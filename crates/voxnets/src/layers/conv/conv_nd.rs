//! # N-d Convolution
//!
//! [`ConvNdConfig`] describes a convolution over 1 to 4 spatial dims;
//! the spatial rank is the length of `kernel_size`.
//!
//! [`ConvNd`] dispatches to ``burn``'s [`Conv1d`], [`Conv2d`], [`Conv3d`],
//! or to [`Conv4d`]; [`ConvNd::forward`] accepts rank-generic tensors.

use crate::compat::conv_shape::{PaddingMode, effective_kernel_size, same_padding};
use crate::compat::rank::{cast_rank, to_array};
use crate::geometry::Geometry;
use crate::layers::conv::conv4d::{Conv4d, Conv4dConfig};
use burn::nn::conv::{Conv1d, Conv1dConfig, Conv2d, Conv2dConfig, Conv3d, Conv3dConfig};
use burn::nn::{PaddingConfig1d, PaddingConfig2d, PaddingConfig3d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvNdConfig`] Meta API.
pub trait ConvNdMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The number of output channels.
    fn out_channels(&self) -> usize;

    /// The number of spatial dims.
    fn spatial_dims(&self) -> usize;
}

/// [`ConvNd`] Config.
///
/// Implements [`ConvNdMeta`].
#[derive(Config, Debug)]
pub struct ConvNdConfig {
    /// The number of input channels.
    pub in_channels: usize,

    /// The number of output channels.
    pub out_channels: usize,

    /// The kernel size, one entry per spatial dim.
    pub kernel_size: Vec<usize>,

    /// The stride; defaults to 1 in every dim.
    #[config(default = "None")]
    pub stride: Option<Vec<usize>>,

    /// The dilation; defaults to 1 in every dim.
    #[config(default = "None")]
    pub dilation: Option<Vec<usize>>,

    /// The padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// The number of channel groups.
    #[config(default = 1)]
    pub groups: usize,

    /// Whether to add a bias.
    #[config(default = true)]
    pub bias: bool,
}

impl ConvNdMeta for ConvNdConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn spatial_dims(&self) -> usize {
        self.kernel_size.len()
    }
}

impl ConvNdConfig {
    /// Construct a config with a kernel of `kernel_size` in each of `spatial_dims` dims.
    pub fn cube(
        in_channels: usize,
        out_channels: usize,
        spatial_dims: usize,
        kernel_size: usize,
    ) -> Self {
        Self::new(in_channels, out_channels, vec![kernel_size; spatial_dims])
    }

    /// The effective stride.
    pub fn effective_stride(&self) -> Vec<usize> {
        self.stride
            .clone()
            .unwrap_or_else(|| vec![1; self.spatial_dims()])
    }

    /// The effective dilation.
    pub fn effective_dilation(&self) -> Vec<usize> {
        self.dilation
            .clone()
            .unwrap_or_else(|| vec![1; self.spatial_dims()])
    }

    /// Propagate a [`Geometry`] through this convolution.
    ///
    /// # Returns
    ///
    /// An error if a ``valid`` kernel does not fit.
    pub fn try_output_geometry(
        &self,
        input: &Geometry,
    ) -> Result<Geometry, String> {
        input.try_conv(
            &self.kernel_size,
            &self.effective_stride(),
            &self.effective_dilation(),
            self.padding,
        )
    }

    /// Propagate a [`Geometry`] through this convolution.
    ///
    /// # Panics
    ///
    /// If the kernel does not fit.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Geometry {
        match self.try_output_geometry(input) {
            Ok(geometry) => geometry,
            Err(err) => panic!("{err}"),
        }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        let n = self.spatial_dims();
        if !(1..=4).contains(&n) {
            return Err(format!(
                "convolutions support 1 to 4 spatial dims, got kernel {:?}",
                self.kernel_size
            ));
        }
        let stride = self.effective_stride();
        let dilation = self.effective_dilation();
        if stride.len() != n || dilation.len() != n {
            return Err(format!(
                "kernel {:?}, stride {stride:?} and dilation {dilation:?} must have the same length",
                self.kernel_size
            ));
        }
        if self
            .kernel_size
            .iter()
            .chain(&stride)
            .chain(&dilation)
            .any(|&v| v == 0)
        {
            return Err(format!(
                "kernel {:?}, stride {stride:?} and dilation {dilation:?} must be positive",
                self.kernel_size
            ));
        }
        if self.groups == 0
            || self.in_channels % self.groups != 0
            || self.out_channels % self.groups != 0
        {
            return Err(format!(
                "channels [{}, {}] are not divisible by groups {}",
                self.in_channels, self.out_channels, self.groups
            ));
        }
        if self.padding == PaddingMode::Same {
            // The time dim of a 4d conv is padded asymmetrically.
            let first = if n == 4 { 1 } else { 0 };
            for i in first..n {
                if effective_kernel_size(self.kernel_size[i], dilation[i]) % 2 == 0 {
                    return Err(format!(
                        "same padding requires odd spatial kernels, got {:?} (dilation {dilation:?})",
                        self.kernel_size
                    ));
                }
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    fn spatial_padding(
        &self,
        dims: core::ops::Range<usize>,
    ) -> Vec<usize> {
        let dilation = self.effective_dilation();
        dims.map(|i| match self.padding {
            PaddingMode::Same => same_padding(self.kernel_size[i], dilation[i]),
            PaddingMode::Valid => 0,
        })
        .collect()
    }

    /// Initialize a [`ConvNd`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNd<B> {
        self.expect_valid();

        let channels = [self.in_channels, self.out_channels];
        let kernel = &self.kernel_size;
        let stride = self.effective_stride();
        let dilation = self.effective_dilation();

        match self.spatial_dims() {
            1 => {
                let pad = self.spatial_padding(0..1);
                Conv1dConfig::new(self.in_channels, self.out_channels, kernel[0])
                    .with_stride(stride[0])
                    .with_dilation(dilation[0])
                    .with_padding(PaddingConfig1d::Explicit(pad[0]))
                    .with_groups(self.groups)
                    .with_bias(self.bias)
                    .init(device)
                    .into()
            }
            2 => {
                let pad = self.spatial_padding(0..2);
                Conv2dConfig::new(channels, to_array(kernel))
                    .with_stride(to_array(&stride))
                    .with_dilation(to_array(&dilation))
                    .with_padding(PaddingConfig2d::Explicit(pad[0], pad[1]))
                    .with_groups(self.groups)
                    .with_bias(self.bias)
                    .init(device)
                    .into()
            }
            3 => {
                let pad = self.spatial_padding(0..3);
                Conv3dConfig::new(channels, to_array(kernel))
                    .with_stride(to_array(&stride))
                    .with_dilation(to_array(&dilation))
                    .with_padding(PaddingConfig3d::Explicit(pad[0], pad[1], pad[2]))
                    .with_groups(self.groups)
                    .with_bias(self.bias)
                    .init(device)
                    .into()
            }
            _ => Conv4dConfig::new(channels, to_array(kernel))
                .with_stride(to_array(&stride))
                .with_dilation(to_array(&dilation))
                .with_padding(self.padding)
                .with_groups(self.groups)
                .with_bias(self.bias)
                .init(device)
                .into(),
        }
    }
}

/// Convolution over 1 to 4 spatial dims.
///
/// Implements [`ConvNdMeta`].
#[derive(Module, Debug)]
pub enum ConvNd<B: Backend> {
    /// 1 spatial dim.
    Conv1d(Conv1d<B>),

    /// 2 spatial dims.
    Conv2d(Conv2d<B>),

    /// 3 spatial dims.
    Conv3d(Conv3d<B>),

    /// 4 spatial dims; ``[time, depth, height, width]``.
    Conv4d(Conv4d<B>),
}

impl<B: Backend> From<Conv1d<B>> for ConvNd<B> {
    fn from(conv: Conv1d<B>) -> Self {
        Self::Conv1d(conv)
    }
}

impl<B: Backend> From<Conv2d<B>> for ConvNd<B> {
    fn from(conv: Conv2d<B>) -> Self {
        Self::Conv2d(conv)
    }
}

impl<B: Backend> From<Conv3d<B>> for ConvNd<B> {
    fn from(conv: Conv3d<B>) -> Self {
        Self::Conv3d(conv)
    }
}

impl<B: Backend> From<Conv4d<B>> for ConvNd<B> {
    fn from(conv: Conv4d<B>) -> Self {
        Self::Conv4d(conv)
    }
}

impl<B: Backend> ConvNdMeta for ConvNd<B> {
    fn in_channels(&self) -> usize {
        match self {
            Self::Conv1d(conv) => conv.weight.shape().dims[1] * conv.groups,
            Self::Conv2d(conv) => conv.weight.shape().dims[1] * conv.groups,
            Self::Conv3d(conv) => conv.weight.shape().dims[1] * conv.groups,
            Self::Conv4d(conv) => conv.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Conv1d(conv) => conv.weight.shape().dims[0],
            Self::Conv2d(conv) => conv.weight.shape().dims[0],
            Self::Conv3d(conv) => conv.weight.shape().dims[0],
            Self::Conv4d(conv) => conv.out_channels(),
        }
    }

    fn spatial_dims(&self) -> usize {
        match self {
            Self::Conv1d(_) => 1,
            Self::Conv2d(_) => 2,
            Self::Conv3d(_) => 3,
            Self::Conv4d(_) => 4,
        }
    }
}

impl<B: Backend> ConvNd<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, spatial...]`` with `spatial_dims()` spatial dims.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_spatial...]``
    ///
    /// # Panics
    ///
    /// If the tensor rank does not match the spatial rank of the conv.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Conv1d(conv) => cast_rank(conv.forward(cast_rank::<B, D, 3>(input))),
            Self::Conv2d(conv) => cast_rank(conv.forward(cast_rank::<B, D, 4>(input))),
            Self::Conv3d(conv) => cast_rank(conv.forward(cast_rank::<B, D, 5>(input))),
            Self::Conv4d(conv) => cast_rank(conv.forward(cast_rank::<B, D, 6>(input))),
        }
    }
}
