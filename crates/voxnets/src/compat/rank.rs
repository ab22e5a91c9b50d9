//! # Tensor Rank Utilities
//!
//! Rank-generic modules dispatch to fixed-rank ``burn`` layers at runtime;
//! these helpers move a tensor between a generic rank and a concrete one.

use burn::prelude::{Backend, Tensor};

/// Re-type a rank `D` tensor as a rank `D2` tensor.
///
/// # Panics
///
/// If `D != D2`.
pub fn cast_rank<B: Backend, const D: usize, const D2: usize>(tensor: Tensor<B, D>) -> Tensor<B, D2> {
    assert_eq!(
        D, D2,
        "expected a rank-{D2} tensor, got a rank-{D} tensor"
    );
    let dims = tensor.dims();
    let target: [usize; D2] = core::array::from_fn(|i| dims[i]);
    tensor.reshape(target)
}

/// Reshape a tensor to a dynamically computed shape of the same rank.
///
/// # Panics
///
/// If `dims.len() != D`.
pub fn reshape_dyn<B: Backend, const D: usize, const D2: usize>(
    tensor: Tensor<B, D>,
    dims: &[usize],
) -> Tensor<B, D2> {
    tensor.reshape(to_array::<D2>(dims))
}

/// Convert a slice to a fixed size array.
///
/// # Panics
///
/// If `values.len() != N`.
pub fn to_array<const N: usize>(values: &[usize]) -> [usize; N] {
    assert_eq!(
        values.len(),
        N,
        "expected {N} values, got {}: {values:?}",
        values.len()
    );
    core::array::from_fn(|i| values[i])
}

/// The spatial dims of a ``[batch, channels, spatial...]`` tensor.
pub fn spatial_dims<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<usize> {
    tensor.dims()[2..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_cast_rank() {
        type B = NdArray<f32>;
        let device = Default::default();

        let tensor: Tensor<B, 5> = Tensor::ones([1, 2, 3, 4, 5], &device);
        let cast: Tensor<B, 5> = cast_rank(tensor.clone());
        assert_eq!(cast.dims(), [1, 2, 3, 4, 5]);
        assert_eq!(spatial_dims(&cast), vec![3, 4, 5]);

        let flat: Tensor<B, 2> = reshape_dyn(tensor, &[2, 60]);
        assert_eq!(flat.dims(), [2, 60]);
    }

    #[test]
    #[should_panic(expected = "expected a rank-4 tensor, got a rank-5 tensor")]
    fn test_cast_rank_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let tensor: Tensor<B, 5> = Tensor::ones([1, 2, 3, 4, 5], &device);
        let _: Tensor<B, 4> = cast_rank(tensor);
    }

    #[test]
    fn test_to_array() {
        assert_eq!(to_array::<3>(&[1, 2, 3]), [1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "expected 2 values, got 3")]
    fn test_to_array_panic() {
        to_array::<2>(&[1, 2, 3]);
    }
}
