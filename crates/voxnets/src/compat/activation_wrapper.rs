//! # Activations
//!
//! A rank-generic [`Activation`] module over the element-wise ``burn``
//! activations, selectable by name (see [`ActivationConfig::from_str`]).
use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu, Sigmoid, Tanh};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::silu;
use std::str::FromStr;

/// Sigmoid linear unit: ``x * sigmoid(x)``; a.k.a. swish.
#[derive(Module, Clone, Debug, Default)]
pub struct Silu;

impl Silu {
    /// Forward pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        silu(input)
    }
}

/// [`Activation`] Config.
#[derive(Config, Debug)]
pub enum ActivationConfig {
    /// ``max(x, 0)``.
    Relu,

    /// [`LeakyRelu`], with a configurable negative slope.
    LeakyRelu(LeakyReluConfig),

    /// [`PRelu`], with learned negative slopes.
    PRelu(PReluConfig),

    /// [`Silu`].
    Silu,

    /// [`Gelu`].
    Gelu,

    /// [`Sigmoid`].
    Sigmoid,

    /// [`Tanh`].
    Tanh,
}

impl ActivationConfig {
    /// The name accepted by [`ActivationConfig::from_str`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::LeakyRelu(_) => "leaky_relu",
            Self::PRelu(_) => "prelu",
            Self::Silu => "silu",
            Self::Gelu => "gelu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
        }
    }

    /// Initialize an [`Activation`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            Self::Relu => Activation::Relu(Relu),
            Self::LeakyRelu(config) => Activation::LeakyRelu(config.init()),
            Self::PRelu(config) => Activation::PRelu(config.init(device)),
            Self::Silu => Activation::Silu(Silu),
            Self::Gelu => Activation::Gelu(Gelu),
            Self::Sigmoid => Activation::Sigmoid(Sigmoid),
            Self::Tanh => Activation::Tanh(Tanh),
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl FromStr for ActivationConfig {
    type Err = String;

    /// Parse an activation name; case, ``-`` and ``_`` are ignored.
    ///
    /// ``swish`` is an alias of ``silu``.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        Ok(match key.as_str() {
            "relu" => Self::Relu,
            "leakyrelu" => Self::LeakyRelu(LeakyReluConfig::new()),
            "prelu" => Self::PRelu(PReluConfig::new()),
            "silu" | "swish" => Self::Silu,
            "gelu" => Self::Gelu,
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            _ => {
                return Err(format!(
                    "unknown activation {s:?}, choose one of: relu, leaky_relu, prelu, silu, gelu, sigmoid, tanh"
                ));
            }
        })
    }
}

/// Rank-generic activation layer.
#[derive(Module, Debug)]
pub enum Activation<B: Backend> {
    /// [`Relu`].
    Relu(Relu),

    /// [`LeakyRelu`].
    LeakyRelu(LeakyRelu),

    /// [`PRelu`].
    PRelu(PRelu<B>),

    /// [`Silu`].
    Silu(Silu),

    /// [`Gelu`].
    Gelu(Gelu),

    /// [`Sigmoid`].
    Sigmoid(Sigmoid),

    /// [`Tanh`].
    Tanh(Tanh),
}

impl<B: Backend> Activation<B> {
    /// Forward pass.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Relu(layer) => layer.forward(input),
            Activation::LeakyRelu(layer) => layer.forward(input),
            Activation::PRelu(layer) => layer.forward(input),
            Activation::Silu(layer) => layer.forward(input),
            Activation::Gelu(layer) => layer.forward(input),
            Activation::Sigmoid(layer) => layer.forward(input),
            Activation::Tanh(layer) => layer.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_tensors_close, tensor_values};
    use burn::backend::NdArray;
    use burn::tensor::activation::sigmoid;

    type TestBackend = NdArray<f32>;

    fn volume(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 5> {
        Tensor::<TestBackend, 1>::from_floats([-2.0, -0.5, 0.0, 0.5, 1.0, 3.0, -1.0, 2.0], device)
            .reshape([1, 1, 2, 2, 2])
    }

    #[test]
    fn test_parse_names() {
        for (name, expected) in [
            ("ReLU", "relu"),
            ("leaky-relu", "leaky_relu"),
            ("LeakyReLU", "leaky_relu"),
            ("swish", "silu"),
            ("SiLU", "silu"),
            ("Tanh", "tanh"),
            ("PReLU", "prelu"),
        ] {
            let config: ActivationConfig = name.parse().unwrap();
            assert_eq!(config.name(), expected);
        }
        assert!("elu".parse::<ActivationConfig>().is_err());
        assert!(matches!(ActivationConfig::default(), ActivationConfig::Relu));
    }

    #[test]
    fn test_relu_volume() {
        let device = Default::default();
        let output = ActivationConfig::Relu
            .init::<TestBackend>(&device)
            .forward(volume(&device));
        assert_eq!(
            tensor_values(output),
            vec![0.0, 0.0, 0.0, 0.5, 1.0, 3.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_silu() {
        let device = Default::default();
        let input = volume(&device);
        let expected = input.clone() * sigmoid(input.clone());
        let output = ActivationConfig::Silu
            .init::<TestBackend>(&device)
            .forward(input);
        assert_tensors_close(output, expected, 1e-6);
    }

    #[test]
    fn test_leaky_relu_slope() {
        let device = Default::default();
        let config = ActivationConfig::LeakyRelu(LeakyReluConfig::new().with_negative_slope(0.1));
        let output = config.init::<TestBackend>(&device).forward(volume(&device));
        let expected: Vec<f64> = vec![-0.2, -0.05, 0.0, 0.5, 1.0, 3.0, -0.1, 2.0];
        for (a, e) in tensor_values(output).into_iter().zip(expected) {
            assert!((a - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_record_round_trip() {
        let device = Default::default();
        let config = ActivationConfig::PRelu(PReluConfig::new().with_alpha(0.5));
        let record: ActivationRecord<TestBackend> = config.init(&device).into_record();
        let act: Activation<TestBackend> = config.init(&device).load_record(record);

        let output = act.forward(volume(&device));
        assert_eq!(
            tensor_values(output),
            vec![-1.0, -0.25, 0.0, 0.5, 1.0, 3.0, -0.5, 2.0]
        );

        let input = volume(&device);
        let expected = input.clone().tanh();
        let output = ActivationConfig::Tanh
            .init::<TestBackend>(&device)
            .forward(input);
        assert_tensors_close(output, expected, 1e-6);
    }
}
