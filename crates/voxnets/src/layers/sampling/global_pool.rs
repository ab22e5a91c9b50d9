//! # Global pooling.

use burn::prelude::{Backend, Tensor};

/// Average over all spatial dims.
///
/// # Arguments
///
/// - `input`: ``[batch, channels, spatial...]``.
///
/// # Returns
///
/// ``[batch, channels]``
pub fn global_average_pool<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, 2> {
    let dims = input.dims();
    let [batch, channels] = [dims[0], dims[1]];
    let spatial: usize = dims[2..].iter().product();
    input
        .reshape([batch, channels, spatial])
        .mean_dim(2)
        .reshape([batch, channels])
}
