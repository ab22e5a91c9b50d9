//! # Channel Normalization
//!
//! Wraps the ``burn`` channel norms for ``[batch, channels, spatial...]``
//! tensors of any rank:
//! * [`NormalizationConfig::Batch`] - [`BatchNorm`], over a flattened view.
//! * [`NormalizationConfig::Group`] - [`GroupNorm`].
//!
//! Configs are built feature-size-agnostic (see [`NormalizationConfig::batch`])
//! and matched to the conv they follow with [`NormalizationConfig::with_num_features`].

use burn::nn::{BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Batch norm epsilon used by the classifier families.
pub const CLASSIFIER_BATCH_NORM_EPSILON: f64 = 1.0001e-5;

/// [`Normalization`] Config.
#[derive(Config, Debug)]
pub enum NormalizationConfig {
    /// Per-channel batch statistics.
    Batch(BatchNormConfig),

    /// Per-sample statistics over channel groups.
    Group(GroupNormConfig),
}

impl NormalizationConfig {
    /// A batch norm with the given epsilon; features are matched later.
    pub fn batch(epsilon: f64) -> Self {
        Self::Batch(BatchNormConfig::new(0).with_epsilon(epsilon))
    }

    /// A group norm with `num_groups` groups; features are matched later.
    pub fn group(num_groups: usize) -> Self {
        Self::Group(GroupNormConfig::new(num_groups, 0))
    }

    /// The same norm, sized for `num_features` channels.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            Self::Batch(config) => Self::Batch(BatchNormConfig {
                num_features,
                ..config
            }),
            Self::Group(config) => Self::Group(GroupNormConfig {
                num_channels: num_features,
                ..config
            }),
        }
    }

    /// The configured channel count.
    pub fn num_features(&self) -> usize {
        match self {
            Self::Batch(config) => config.num_features,
            Self::Group(config) => config.num_channels,
        }
    }

    /// Initialize a [`Normalization`] layer.
    ///
    /// # Panics
    ///
    /// If a group norm's channels do not split into its groups.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            Self::Batch(config) => Normalization::Batch(config.init(device)),
            Self::Group(config) => Normalization::Group(config.init(device)),
        }
    }
}

/// Rank-agnostic channel norm layer.
#[derive(Module, Debug)]
pub enum Normalization<B: Backend> {
    /// Batch norm; applied to a rank-4 view.
    Batch(BatchNorm<B, 2>),

    /// Group norm.
    Group(GroupNorm<B>),
}

impl<B: Backend> Normalization<B> {
    /// Normalize ``[batch, channels, spatial...]``, keeping the shape.
    ///
    /// Batch norm statistics are per channel, so flattening the spatial dims
    /// into one does not change them.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Normalization::Batch(norm) => {
                let dims = input.dims();
                let voxels: usize = dims[2..].iter().product();
                let view: Tensor<B, 4> = input.reshape([dims[0], dims[1], voxels, 1]);
                norm.forward(view).reshape(dims)
            }
            Normalization::Group(norm) => norm.forward(input),
        }
    }

    /// The channel count.
    pub fn num_features(&self) -> usize {
        match self {
            Normalization::Batch(norm) => norm.gamma.dims()[0],
            Normalization::Group(norm) => norm.num_channels,
        }
    }
}
