//! # Center cropping.

use crate::compat::rank::spatial_dims;
use burn::prelude::{Backend, Tensor};

/// Center crop the spatial dims of `input` to `shape`.
///
/// The crop offset in each dim is ``(in - out) / 2``.
///
/// # Panics
///
/// If `shape` does not match the spatial rank, or exceeds the input.
pub fn crop_spatial<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    shape: &[usize],
) -> Tensor<B, D> {
    let dims = input.dims();
    assert!(
        shape.len() == D - 2 && shape.iter().zip(&dims[2..]).all(|(&t, &s)| t <= s),
        "cannot crop shape {:?} to {shape:?}",
        &dims[2..]
    );
    if dims[2..] == *shape {
        return input;
    }
    let ranges: [core::ops::Range<usize>; D] = core::array::from_fn(|i| {
        if i < 2 {
            0..dims[i]
        } else {
            let offset = (dims[i] - shape[i - 2]) / 2;
            offset..offset + shape[i - 2]
        }
    });
    input.slice(ranges)
}

/// Crop `left` to the spatial shape of `right` and concatenate on channels.
///
/// # Returns
///
/// ``[batch, left_channels + right_channels, right_spatial...]``
pub fn crop_and_merge<B: Backend, const D: usize>(
    left: Tensor<B, D>,
    right: Tensor<B, D>,
) -> Tensor<B, D> {
    let shape = spatial_dims(&right);
    Tensor::cat(vec![crop_spatial(left, &shape), right], 1)
}
