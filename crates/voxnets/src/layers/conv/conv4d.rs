//! # 4d Convolution
//!
//! [`Conv4d`] convolves ``[batch, channels, time, depth, height, width]``
//! tensors with a ``[kt, kz, ky, kx]`` kernel.
//!
//! The kernel is held as `kt` [`Conv3d`] layers, one per time offset.
//! Each output frame is the sum of the 3d convolutions of the `kt` input
//! frames under the kernel; only the first [`Conv3d`] carries a bias.
//!
//! Under [`PaddingMode::Same`] the time axis is zero padded, possibly
//! asymmetrically (even time kernels are allowed); the spatial kernel
//! must be odd.

use crate::compat::conv_shape::{
    PaddingMode, effective_kernel_size, same_padding, same_padding_asymmetric,
};
use bimm_contracts::{ShapeContract, shape_contract};
use burn::nn::PaddingConfig3d;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::prelude::{Backend, Config, Int, Module, Tensor};

/// [`Conv4d`] Config.
#[derive(Config, Debug)]
pub struct Conv4dConfig {
    /// ``[in_channels, out_channels]``.
    pub channels: [usize; 2],

    /// ``[time, depth, height, width]`` kernel size.
    pub kernel_size: [usize; 4],

    /// Stride.
    #[config(default = "[1, 1, 1, 1]")]
    pub stride: [usize; 4],

    /// Dilation.
    #[config(default = "[1, 1, 1, 1]")]
    pub dilation: [usize; 4],

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Channel groups.
    #[config(default = 1)]
    pub groups: usize,

    /// Add a bias.
    #[config(default = true)]
    pub bias: bool,
}

impl Conv4dConfig {
    /// Initialize a [`Conv4d`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Conv4d<B> {
        let [kt, kz, ky, kx] = self.kernel_size;
        let [st, sz, sy, sx] = self.stride;
        let [dt, dz, dy, dx] = self.dilation;

        let (spatial_padding, (front, back)) = match self.padding {
            PaddingMode::Same => (
                PaddingConfig3d::Explicit(
                    same_padding(kz, dz),
                    same_padding(ky, dy),
                    same_padding(kx, dx),
                ),
                same_padding_asymmetric(kt, dt),
            ),
            PaddingMode::Valid => (PaddingConfig3d::Explicit(0, 0, 0), (0, 0)),
        };

        let frame_convs = (0..kt)
            .map(|i| {
                Conv3dConfig::new(self.channels, [kz, ky, kx])
                    .with_stride([sz, sy, sx])
                    .with_dilation([dz, dy, dx])
                    .with_padding(spatial_padding.clone())
                    .with_groups(self.groups)
                    .with_bias(self.bias && i == 0)
                    .init(device)
            })
            .collect();

        Conv4d {
            frame_convs,
            time_stride: st,
            time_dilation: dt,
            time_padding_front: front,
            time_padding_back: back,
        }
    }
}

/// Spatio-temporal convolution built from per-time-offset [`Conv3d`]s.
#[derive(Module, Debug)]
pub struct Conv4d<B: Backend> {
    /// One 3d convolution per time offset of the kernel.
    pub frame_convs: Vec<Conv3d<B>>,

    /// Time stride.
    pub time_stride: usize,

    /// Time dilation.
    pub time_dilation: usize,

    /// Zero frames prepended.
    pub time_padding_front: usize,

    /// Zero frames appended.
    pub time_padding_back: usize,
}

impl<B: Backend> Conv4d<B> {
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        let conv = &self.frame_convs[0];
        conv.weight.shape().dims[1] * conv.groups
    }

    /// The number of output channels.
    pub fn out_channels(&self) -> usize {
        self.frame_convs[0].weight.shape().dims[0]
    }

    /// The time extent of the kernel.
    pub fn time_kernel_size(&self) -> usize {
        self.frame_convs.len()
    }

    /// The number of output frames for `frames` input frames.
    pub fn output_frames(
        &self,
        frames: usize,
    ) -> Option<usize> {
        let padded = frames + self.time_padding_front + self.time_padding_back;
        let effective = effective_kernel_size(self.time_kernel_size(), self.time_dilation);
        padded
            .checked_sub(effective)
            .map(|extra| extra / self.time_stride + 1)
    }

    fn pad_time(
        &self,
        input: Tensor<B, 6>,
    ) -> Tensor<B, 6> {
        let (front, back) = (self.time_padding_front, self.time_padding_back);
        if front == 0 && back == 0 {
            return input;
        }
        let [batch, channels, _, depth, height, width] = input.dims();
        let device = input.device();

        let mut parts = Vec::with_capacity(3);
        if front > 0 {
            parts.push(Tensor::zeros(
                [batch, channels, front, depth, height, width],
                &device,
            ));
        }
        parts.push(input);
        if back > 0 {
            parts.push(Tensor::zeros(
                [batch, channels, back, depth, height, width],
                &device,
            ));
        }
        Tensor::cat(parts, 2)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, time, depth, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_time, out_depth, out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the time kernel does not fit the (padded) input.
    pub fn forward(
        &self,
        input: Tensor<B, 6>,
    ) -> Tensor<B, 6> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_channels", "frames", "depth", "height", "width"];
        let [batch, frames, depth, height, width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "frames", "depth", "height", "width"],
            &[("in_channels", self.in_channels())],
        );
        let out_frames = match self.output_frames(frames) {
            Some(out_frames) => out_frames,
            None => panic!(
                "time kernel {} (dilation {}) does not fit {frames} frames",
                self.time_kernel_size(),
                self.time_dilation
            ),
        };
        let channels = self.in_channels();
        let device = input.device();

        // [batch, time, channels, depth, height, width]
        let input = self.pad_time(input).swap_dims(1, 2);

        let frames_at = |offset: usize| -> Tensor<B, 5> {
            let start = offset * self.time_dilation;
            let end = start + (out_frames - 1) * self.time_stride + 1;
            let indices = Tensor::<B, 1, Int>::arange_step(
                start as i64..end as i64,
                self.time_stride,
                &device,
            );
            input
                .clone()
                .select(1, indices)
                .reshape([batch * out_frames, channels, depth, height, width])
        };

        let output = self
            .frame_convs
            .iter()
            .enumerate()
            .skip(1)
            .fold(
                self.frame_convs[0].forward(frames_at(0)),
                |acc, (offset, conv)| acc + conv.forward(frames_at(offset)),
            );

        let [_, out_channels, out_depth, out_height, out_width] = output.dims();
        output
            .reshape([
                batch,
                out_frames,
                out_channels,
                out_depth,
                out_height,
                out_width,
            ])
            .swap_dims(1, 2)
    }
}
