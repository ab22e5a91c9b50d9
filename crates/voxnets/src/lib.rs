#![warn(missing_docs)]
//!# voxnets - Volumetric Network Builders for Burn
//!
//! Parametric architecture builders for microscopy segmentation and
//! classification, for inputs with 1 to 4 spatial dimensions.
//!
//! ## Notable Components
//!
//! * [`geometry`] - shape, field-of-view and voxel-size bookkeeping.
//! * [`compat`] - adapters over ``burn`` layers.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::normalization_wrapper::Normalization`] - rank-agnostic norm layer wrapper.
//!   * [`compat::conv_shape`] - convolution arithmetic.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::conv`] - N-d, 4d, transposed and depthwise convolutions.
//!   * [`layers::blocks`] - conv/norm/act blocks and conv passes.
//!   * [`layers::sampling`] - pooling, upsampling, cropping.
//!   * [`layers::drop`] - drop path / drop connect.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - pre-activation `ResNet`.
//!   * [`models::unet`] - `U-Net`.
//!   * [`models::vgg`] - `VGG`.
//!   * [`models::efficientnet`] - `EfficientNet`.
//! * [`losses`] - metric learning losses.
//!   * [`losses::um_loss`] - the ultrametric (MST) loss.

extern crate alloc;
extern crate core;

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;

#[cfg(test)]
pub(crate) mod testing;

pub mod geometry;
pub mod layers;
pub mod losses;
pub mod models;
pub mod utility;
