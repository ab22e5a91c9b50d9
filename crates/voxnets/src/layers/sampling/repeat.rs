//! # Nearest-neighbour ("constant") upsampling.

use crate::compat::rank::reshape_dyn;
use crate::geometry::broadcast_dims;
use burn::prelude::{Backend, Tensor};

/// Repeat every voxel `factors` times along each spatial dim.
///
/// # Arguments
///
/// - `input`: ``[batch, channels, spatial...]``.
/// - `factors`: one factor per spatial dim, or a single broadcast factor.
///
/// # Returns
///
/// ``[batch, channels, spatial * factors...]``
pub fn repeat_nearest<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    factors: &[usize],
) -> Tensor<B, D> {
    let factors = broadcast_dims(factors, D - 2);
    factors
        .iter()
        .enumerate()
        .filter(|&(_, &factor)| factor != 1)
        .fold(input, |x, (i, &factor)| repeat_axis(x, i + 2, factor))
}

fn repeat_axis<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    axis: usize,
    factor: usize,
) -> Tensor<B, D> {
    assert!(factor > 0, "upsampling factors must be positive");
    let dims = x.dims();
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();

    let mut target = dims.to_vec();
    target[axis] *= factor;

    let x: Tensor<B, 4> = x.reshape([outer, dims[axis], 1, inner]);
    reshape_dyn(x.repeat_dim(2, factor), &target)
}
