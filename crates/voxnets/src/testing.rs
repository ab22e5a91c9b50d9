//! Test helpers.

use burn::prelude::{Backend, Tensor};
use hamcrest::prelude::*;

/// Assert two tensors have the same shape and element-wise close values.
pub fn assert_tensors_close<B: Backend, const D: usize>(
    actual: Tensor<B, D>,
    expected: Tensor<B, D>,
    tolerance: f64,
) {
    assert_eq!(actual.dims(), expected.dims());
    let actual = tensor_values(actual);
    let expected = tensor_values(expected);
    for (a, e) in actual.into_iter().zip(expected) {
        assert_that!(a, is(close_to(e, tolerance)));
    }
}

/// Pull the values of a float tensor to the host, as `f64`.
pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .expect("float tensor data")
}
