//! # `Cna` - conv/norm/activation block.
//!
//! A [`Cna`] module is:
//! * a [`ConvNd`] layer,
//! * an optional [`Normalization`] layer,
//! * an optional [`Activation`] layer.
//!
//! Norm layers are sized to the conv output channels at init.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::geometry::Geometry;
use crate::layers::conv::conv_nd::{ConvNd, ConvNdConfig, ConvNdMeta};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// [`Cna`] Config.
///
/// Implements [`ConvNdMeta`].
#[derive(Config, Debug)]
pub struct CnaConfig {
    /// The [`ConvNd`] config.
    pub conv: ConvNdConfig,

    /// The [`Normalization`] config.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// The [`Activation`] config.
    #[config(default = "Some(ActivationConfig::Relu)")]
    pub act: Option<ActivationConfig>,
}

impl ConvNdMeta for CnaConfig {
    fn in_channels(&self) -> usize {
        self.conv.in_channels
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels
    }

    fn spatial_dims(&self) -> usize {
        self.conv.spatial_dims()
    }
}

impl CnaConfig {
    /// Initialize a [`Cna`].
    ///
    /// Auto-matches the norm layer features to the conv output channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Cna<B> {
        let cfg = self.match_norm_features();
        Cna {
            conv: cfg.conv.init(device),
            norm: cfg.norm.map(|norm| norm.init(device)),
            act: cfg.act.map(|act| act.init(device)),
        }
    }

    /// Adjust the norm features to match the conv output size.
    ///
    /// ['`CnaConfig::init`'] does this automatically.
    pub fn match_norm_features(self) -> Self {
        let features = self.out_channels();
        let norm = self.norm.map(|norm| norm.with_num_features(features));
        Self { norm, ..self }
    }

    /// Propagate a [`Geometry`] through the block.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Geometry {
        self.conv.output_geometry(input)
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`ConvNdMeta`].
#[derive(Module, Debug)]
pub struct Cna<B: Backend> {
    /// Convolution.
    pub conv: ConvNd<B>,

    /// Optional normalization.
    pub norm: Option<Normalization<B>>,

    /// Optional activation.
    pub act: Option<Activation<B>>,
}

impl<B: Backend> ConvNdMeta for Cna<B> {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn spatial_dims(&self) -> usize {
        self.conv.spatial_dims()
    }
}

impl<B: Backend> Cna<B> {
    /// Forward Pass.
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x);
    /// let x = self.act.forward(x);
    /// ```
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_spatial...]``
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        assert_eq!(
            input.dims()[1],
            self.in_channels(),
            "expected {} input channels, got shape {:?}",
            self.in_channels(),
            input.dims()
        );
        let x = self.conv.forward(input);

        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        match &self.act {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::{ShapeContract, shape_contract};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_match_norm_features() {
        let config = CnaConfig::new(
            ConvNdConfig::cube(2, 4, 3, 3)
                .with_stride(Some(vec![2, 2, 2]))
                .with_bias(false),
        )
        .with_norm(Some(NormalizationConfig::batch(1e-5)))
        .match_norm_features();

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.spatial_dims(), 3);
        assert_eq!(config.norm.as_ref().map(|n| n.num_features()), Some(4));
        assert!(matches!(config.act, Some(ActivationConfig::Relu)));
    }

    #[test]
    fn test_cna() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let config = CnaConfig::new(
            ConvNdConfig::cube(2, 4, 2, 3)
                .with_stride(Some(vec![2, 2]))
                .with_bias(false),
        )
        .with_norm(Some(NormalizationConfig::batch(1e-5)));

        let layer: Cna<B> = config.init(&device);
        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.spatial_dims(), 2);

        let input: Tensor<B, 4> = Tensor::random([2, 2, 10, 10], Distribution::Default, &device);

        {
            let output = layer.forward(input.clone());
            static CONTRACT: ShapeContract =
                shape_contract!["batch", "out_channels", "out_height", "out_width"];
            CONTRACT.assert_shape(
                &output,
                &[
                    ("batch", 2),
                    ("out_channels", 4),
                    ("out_height", 5),
                    ("out_width", 5),
                ],
            );
            let expected = {
                let x = layer.conv.forward(input.clone());
                let x = layer.norm.as_ref().unwrap().forward(x);
                layer.act.as_ref().unwrap().forward(x)
            };
            output.to_data().assert_eq(&expected.to_data(), true);
        }
    }

    #[test]
    fn test_conv_only() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: Cna<B> = CnaConfig::new(ConvNdConfig::cube(1, 2, 1, 3))
            .with_act(None)
            .init(&device);
        assert!(layer.norm.is_none());
        assert!(layer.act.is_none());

        let input: Tensor<B, 3> = Tensor::random([1, 1, 7], Distribution::Default, &device);
        let expected = layer.conv.forward(input.clone());
        layer
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic(expected = "expected 2 input channels")]
    fn test_wrong_channels() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: Cna<B> = CnaConfig::new(ConvNdConfig::cube(2, 2, 1, 3)).init(&device);
        layer.forward(Tensor::<B, 3>::zeros([1, 3, 7], &device));
    }
}
