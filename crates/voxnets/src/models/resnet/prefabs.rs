//! # `ResNet` Prefabs
//!
//! Well known depths, by name.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// A well known `ResNet` depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResNetSize {
    /// `ResNet-18`.
    R18,

    /// `ResNet-34`.
    R34,

    /// `ResNet-50`.
    R50,

    /// `ResNet-101`.
    R101,
}

/// All available sizes.
pub const RESNET_SIZES: [ResNetSize; 4] = [
    ResNetSize::R18,
    ResNetSize::R34,
    ResNetSize::R50,
    ResNetSize::R101,
];

impl ResNetSize {
    /// The name of the size: "18", "34", "50" or "101".
    pub fn name(&self) -> &'static str {
        match self {
            ResNetSize::R18 => "18",
            ResNetSize::R34 => "34",
            ResNetSize::R50 => "50",
            ResNetSize::R101 => "101",
        }
    }

    /// Blocks per stack.
    pub fn num_blocks(&self) -> Vec<usize> {
        match self {
            ResNetSize::R18 => vec![2, 2, 2, 2],
            ResNetSize::R34 | ResNetSize::R50 => vec![3, 4, 6, 4],
            ResNetSize::R101 => vec![3, 4, 23, 4],
        }
    }

    /// Does this size use bottleneck blocks?
    pub fn use_bottleneck(&self) -> bool {
        matches!(self, ResNetSize::R50 | ResNetSize::R101)
    }
}

impl fmt::Display for ResNetSize {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResNetSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RESNET_SIZES
            .iter()
            .find(|size| size.name() == s)
            .copied()
            .ok_or_else(|| {
                let names: Vec<&str> = RESNET_SIZES.iter().map(|size| size.name()).collect();
                format!(
                    "unknown resnet size, choose one of: {}",
                    names.join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(ResNetSize::R18.num_blocks(), vec![2, 2, 2, 2]);
        assert!(!ResNetSize::R18.use_bottleneck());
        assert_eq!(ResNetSize::R34.num_blocks(), vec![3, 4, 6, 4]);
        assert!(!ResNetSize::R34.use_bottleneck());
        assert_eq!(ResNetSize::R50.num_blocks(), vec![3, 4, 6, 4]);
        assert!(ResNetSize::R50.use_bottleneck());
        assert_eq!(ResNetSize::R101.num_blocks(), vec![3, 4, 23, 4]);
        assert!(ResNetSize::R101.use_bottleneck());
    }

    #[test]
    fn test_parse() {
        for size in RESNET_SIZES {
            assert_eq!(size.to_string().parse::<ResNetSize>(), Ok(size));
        }
        assert_eq!(
            "152".parse::<ResNetSize>(),
            Err("unknown resnet size, choose one of: 18, 34, 50, 101".to_string())
        );
    }
}
