//! # Convolutions of any spatial rank.
//!
//! * [`conv_nd`] - 1d..4d convolution dispatch.
//! * [`conv4d`] - spatio-temporal 4d convolution built from 3d convolutions.
//! * [`conv_transpose_nd`] - learned upsampling.
//! * [`depthwise`] - depthwise (per-channel) convolution.
pub mod conv4d;
pub mod conv_nd;
pub mod conv_transpose_nd;
pub mod depthwise;
