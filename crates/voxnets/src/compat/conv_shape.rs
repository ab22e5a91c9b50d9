//! # Convolution Shape Utilities
//!
//! Utilities for computing the output shape and padding of convolution
//! and pooling operations, in the ``same`` / ``valid`` padding vocabulary.

use serde::{Deserialize, Serialize};

/// Convolution padding policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingMode {
    /// Zero padding such that ``out = ceil(in / stride)``.
    #[default]
    Same,

    /// No padding; ``out = (in - effective_kernel) / stride + 1``.
    Valid,
}

/// The effective (dilated) extent of a kernel.
///
/// ```text
/// effective = dilation * (kernel_size - 1) + 1
/// ```
pub fn effective_kernel_size(
    kernel_size: usize,
    dilation: usize,
) -> usize {
    assert!(kernel_size > 0);
    assert!(dilation > 0);
    dilation * (kernel_size - 1) + 1
}

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///   visual explanations of these convolution parameters.
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to all sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(stride > 0);

    let pos = input_size + 2 * padding + stride;
    let kernel_width = effective_kernel_size(kernel_size, dilation);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Symmetric ``same`` padding for one dimension.
///
/// # Panics
///
/// If the effective kernel size is even; symmetric padding can't preserve
/// the alignment of an even kernel.
pub fn same_padding(
    kernel_size: usize,
    dilation: usize,
) -> usize {
    let effective = effective_kernel_size(kernel_size, dilation);
    assert!(
        effective % 2 == 1,
        "same padding requires an odd effective kernel size, got {effective}"
    );
    (effective - 1) / 2
}

/// Asymmetric ``same`` padding for one dimension, as ``(front, back)``.
///
/// Matches the usual convention of placing the extra element at the back.
pub fn same_padding_asymmetric(
    kernel_size: usize,
    dilation: usize,
) -> (usize, usize) {
    let total = effective_kernel_size(kernel_size, dilation) - 1;
    let front = total / 2;
    (front, total - front)
}

/// Predict the output size of a 1D convolution under a [`PaddingMode`].
///
/// # Returns
///
/// `None` if a ``valid`` convolution does not fit the input.
pub fn maybe_padded_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    padding: PaddingMode,
) -> Option<usize> {
    match padding {
        PaddingMode::Same => {
            assert!(stride > 0);
            if input_size == 0 {
                None
            } else {
                Some(input_size.div_ceil(stride))
            }
        }
        PaddingMode::Valid => {
            maybe_conv1d_output_size(input_size, kernel_size, stride, 0, dilation)
        }
    }
}

/// Predict the output shape of an N-d convolution under a [`PaddingMode`].
///
/// # Arguments
///
/// - `input_shape`: The input spatial shape, each dim must be > 0.
/// - `kernel_shape`: The kernel shape; length must match `input_shape`.
/// - `stride`: The stride; length must match `input_shape`.
/// - `dilation`: The dilation; length must match `input_shape`.
/// - `padding`: The padding policy.
///
/// # Returns
///
/// An `Option<Vec<usize>>` representing the output shape; or `None` if any dim is <= 0.
pub fn maybe_conv_output_shape_dyn(
    input_shape: &[usize],
    kernel_shape: &[usize],
    stride: &[usize],
    dilation: &[usize],
    padding: PaddingMode,
) -> Option<Vec<usize>> {
    let rank = input_shape.len();
    assert_eq!(kernel_shape.len(), rank);
    assert_eq!(stride.len(), rank);
    assert_eq!(dilation.len(), rank);

    (0..rank)
        .map(|i| {
            maybe_padded_output_size(
                input_shape[i],
                kernel_shape[i],
                stride[i],
                dilation[i],
                padding,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv1d_output_size() {
        fn conv1d_output_size_reference(
            input_size: usize,
            kernel_size: usize,
            stride: usize,
            padding: usize,
            dilation: usize,
        ) -> Option<usize> {
            let effective = (input_size + 2 * padding) as f64;
            let kernel_width = 1.0 + (dilation * (kernel_size - 1)) as f64;

            let x = (((effective - kernel_width) / stride as f64) + 1.0).floor();
            if x < 1.0 { None } else { Some(x as usize) }
        }

        for input_size in 1..10 {
            for stride in 1..3 {
                for kernel_size in 1..4 {
                    for dilation in 1..3 {
                        for padding in 0..4 {
                            assert_eq!(
                                maybe_conv1d_output_size(
                                    input_size,
                                    kernel_size,
                                    stride,
                                    padding,
                                    dilation
                                ),
                                conv1d_output_size_reference(
                                    input_size,
                                    kernel_size,
                                    stride,
                                    padding,
                                    dilation
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_same_padding_matches_ceil_division() {
        for input_size in 1..20 {
            for stride in 1..4 {
                for kernel_size in [1, 3, 5, 7] {
                    let padding = same_padding(kernel_size, 1);
                    assert_eq!(
                        maybe_conv1d_output_size(input_size, kernel_size, stride, padding, 1),
                        maybe_padded_output_size(
                            input_size,
                            kernel_size,
                            stride,
                            1,
                            PaddingMode::Same
                        ),
                    );
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "same padding requires an odd effective kernel size, got 4")]
    fn test_same_padding_even_kernel() {
        same_padding(4, 1);
    }

    #[test]
    fn test_same_padding_asymmetric() {
        assert_eq!(same_padding_asymmetric(1, 1), (0, 0));
        assert_eq!(same_padding_asymmetric(3, 1), (1, 1));
        assert_eq!(same_padding_asymmetric(4, 1), (1, 2));
        assert_eq!(same_padding_asymmetric(2, 2), (1, 1));
    }

    #[test]
    fn test_conv_output_shape_dyn() {
        assert_eq!(
            maybe_conv_output_shape_dyn(
                &[16, 64, 64],
                &[3, 3, 3],
                &[1, 2, 2],
                &[1, 1, 1],
                PaddingMode::Valid
            ),
            Some(vec![14, 31, 31])
        );
        assert_eq!(
            maybe_conv_output_shape_dyn(
                &[16, 63, 64],
                &[3, 3, 3],
                &[1, 2, 2],
                &[1, 1, 1],
                PaddingMode::Same
            ),
            Some(vec![16, 32, 32])
        );
        assert_eq!(
            maybe_conv_output_shape_dyn(&[2, 8], &[3, 3], &[1, 1], &[1, 1], PaddingMode::Valid),
            None
        );
    }
}
