//! # N-d Max Pooling
//!
//! [`MaxPoolNd`] pools ``valid`` windows over any number of spatial dims,
//! one dim at a time. A kernel of 1 with stride `s` is strided subsampling.

use crate::geometry::{Geometry, broadcast_dims};
use burn::module::Ignored;
use burn::prelude::{Backend, Config, Int, Module, Tensor};

/// [`MaxPoolNd`] Config.
#[derive(Config, Debug)]
pub struct MaxPoolNdConfig {
    /// Window size, one entry per spatial dim.
    pub kernel_size: Vec<usize>,

    /// Stride; defaults to the kernel size.
    #[config(default = "None")]
    pub stride: Option<Vec<usize>>,
}

impl MaxPoolNdConfig {
    /// Strided subsampling: kernel 1, stride `stride`.
    pub fn subsample(stride: Vec<usize>) -> Self {
        Self::new(vec![1; stride.len()]).with_stride(Some(stride))
    }

    /// The effective stride.
    pub fn effective_stride(&self) -> Vec<usize> {
        self.stride
            .clone()
            .unwrap_or_else(|| self.kernel_size.clone())
    }

    /// Propagate a [`Geometry`] through the pooling.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Geometry {
        input.pool(&self.kernel_size, &self.effective_stride())
    }

    /// Initialize a [`MaxPoolNd`].
    pub fn init(&self) -> MaxPoolNd {
        let stride = self.effective_stride();
        assert!(
            stride.len() == self.kernel_size.len()
                && self.kernel_size.iter().chain(&stride).all(|&v| v > 0),
            "invalid pooling kernel {:?} with stride {stride:?}",
            self.kernel_size
        );
        MaxPoolNd {
            kernel_size: Ignored(self.kernel_size.clone()),
            stride: Ignored(stride),
        }
    }
}

/// Max pooling over any number of spatial dims.
#[derive(Module, Clone, Debug)]
pub struct MaxPoolNd {
    /// Window size.
    pub kernel_size: Ignored<Vec<usize>>,

    /// Stride.
    pub stride: Ignored<Vec<usize>>,
}

impl MaxPoolNd {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, spatial...]``; kernel sizes that are a
    ///   single value broadcast over all spatial dims.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, (spatial - kernel) / stride + 1...]``
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let n = D - 2;
        let kernel_size = broadcast_dims(&self.kernel_size, n);
        let stride = broadcast_dims(&self.stride, n);

        (0..n).fold(input, |x, i| {
            pool_axis(x, i + 2, kernel_size[i], stride[i])
        })
    }
}

fn pool_axis<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    axis: usize,
    kernel_size: usize,
    stride: usize,
) -> Tensor<B, D> {
    if kernel_size == 1 && stride == 1 {
        return x;
    }
    let size = x.dims()[axis];
    assert!(
        size >= kernel_size,
        "pooling kernel {kernel_size} does not fit size {size} of axis {axis}"
    );
    let out = (size - kernel_size) / stride + 1;
    let device = x.device();

    let window = |offset: usize| {
        let indices = Tensor::<B, 1, Int>::arange_step(
            offset as i64..(offset + (out - 1) * stride + 1) as i64,
            stride,
            &device,
        );
        x.clone().select(axis, indices)
    };

    (1..kernel_size).fold(window(0), |acc, offset| acc.max_pair(window(offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    #[test]
    fn test_pool_2d() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::<B, 1>::from_floats(
            [
                1.0, 2.0, 3.0, 4.0, //
                5.0, 6.0, 7.0, 8.0, //
                9.0, 1.0, 2.0, 3.0, //
                4.0, 5.0, 6.0, 0.0,
            ],
            &device,
        )
        .reshape([1, 1, 4, 4]);

        let pool = MaxPoolNdConfig::new(vec![2, 2]).init();
        pool.forward(input.clone()).to_data().assert_eq(
            &TensorData::from([[[[6.0f32, 8.0], [9.0, 6.0]]]]),
            false,
        );

        let pool = MaxPoolNdConfig::new(vec![3, 3])
            .with_stride(Some(vec![1, 1]))
            .init();
        pool.forward(input).to_data().assert_eq(
            &TensorData::from([[[[9.0f32, 8.0], [9.0, 8.0]]]]),
            false,
        );
    }

    #[test]
    fn test_subsample() {
        let device = Default::default();
        let input: Tensor<B, 3> =
            Tensor::<B, 1>::from_floats([0.0, 1.0, 2.0, 3.0, 4.0], &device).reshape([1, 1, 5]);
        let pool = MaxPoolNdConfig::subsample(vec![2]).init();
        pool.forward(input)
            .to_data()
            .assert_eq(&TensorData::from([[[0.0f32, 2.0, 4.0]]]), false);
    }

    #[test]
    fn test_pool_4d_shapes_match_geometry() {
        let device = Default::default();
        let config = MaxPoolNdConfig::new(vec![1, 2, 2, 2]);
        let input: Tensor<B, 6> = Tensor::ones([1, 2, 3, 4, 6, 8], &device);
        let geometry = config.output_geometry(&Geometry::new(vec![3, 4, 6, 8], &[1]));
        let output = config.init().forward(input);
        assert_eq!(output.dims()[2..].to_vec(), geometry.shape);
        assert_eq!(geometry.shape, vec![3, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "does not fit size 1")]
    fn test_kernel_too_large() {
        let device = Default::default();
        let input: Tensor<B, 3> = Tensor::ones([1, 1, 1], &device);
        MaxPoolNdConfig::new(vec![2]).init().forward(input);
    }
}
