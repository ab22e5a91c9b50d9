//! # `DropPath` - stochastic depth / drop connect.
//!
//! Zeroes whole samples of a residual branch with probability `drop_prob`,
//! scaling the survivors by ``1 / (1 - drop_prob)``.
//!
//! Only active when the backend tracks gradients (training).

use crate::utility::probability::expect_probability;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::Distribution;

/// [`DropPath`] Config.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// Probability of dropping a sample.
    #[config(default = 0.0)]
    pub drop_prob: f64,

    /// Scale the kept samples by ``1 / keep_prob``.
    #[config(default = true)]
    pub scale_by_keep: bool,
}

impl DropPathConfig {
    /// Initialize a [`DropPath`].
    pub fn init(&self) -> DropPath {
        DropPath {
            drop_prob: expect_probability(self.drop_prob),
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// Per-sample drop path.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// Probability of dropping a sample.
    pub drop_prob: f64,

    /// Scale the kept samples by ``1 / keep_prob``.
    pub scale_by_keep: bool,
}

impl DropPath {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, ...]``.
    ///
    /// # Returns
    ///
    /// `input`, with dropped samples zeroed.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if !B::ad_enabled() || self.drop_prob == 0.0 {
            return input;
        }
        let keep_prob = 1.0 - self.drop_prob;
        let batch = input.dims()[0];
        let mask_shape: [usize; D] = core::array::from_fn(|i| if i == 0 { batch } else { 1 });

        let mask: Tensor<B, D> = Tensor::<B, 1>::random(
            [batch],
            Distribution::Bernoulli(keep_prob),
            &input.device(),
        )
        .reshape(mask_shape);

        let mask = if self.scale_by_keep && keep_prob > 0.0 {
            mask.div_scalar(keep_prob)
        } else {
            mask
        };

        input * mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tensor_values;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_identity_without_autodiff() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer = DropPathConfig::new().with_drop_prob(0.9).init();
        let input: Tensor<B, 4> = Tensor::ones([4, 2, 3, 3], &device);
        layer
            .forward(input.clone())
            .to_data()
            .assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_drop_all() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer = DropPathConfig::new().with_drop_prob(1.0).init();
        let input: Tensor<B, 3> = Tensor::ones([4, 2, 3], &device);
        let values = tensor_values(layer.forward(input));
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_samples_are_scaled_or_dropped() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer = DropPathConfig::new().with_drop_prob(0.5).init();
        let input: Tensor<B, 3> = Tensor::ones([16, 2, 3], &device);
        let values = tensor_values(layer.forward(input));
        for sample in values.chunks(6) {
            assert!(
                sample.iter().all(|&v| v == 0.0) || sample.iter().all(|&v| (v - 2.0).abs() < 1e-6),
                "{sample:?}"
            );
        }
    }

    #[test]
    #[should_panic(expected = "probability")]
    fn test_bad_probability() {
        DropPathConfig::new().with_drop_prob(1.5).init();
    }
}
