//! # `EfficientNet` Prefabs
//!
//! Compound scaling coefficients of the `B0` to `B7` variants,
//! the default block table, and the rounding rules that scale it.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// A well known `EfficientNet` scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EfficientNetVariant {
    /// `EfficientNet-B0`.
    B0,
    /// `EfficientNet-B1`.
    B1,
    /// `EfficientNet-B2`.
    B2,
    /// `EfficientNet-B3`.
    B3,
    /// `EfficientNet-B4`.
    B4,
    /// `EfficientNet-B5`.
    B5,
    /// `EfficientNet-B6`.
    B6,
    /// `EfficientNet-B7`.
    B7,
}

/// All available variants.
pub const EFFICIENTNET_VARIANTS: [EfficientNetVariant; 8] = [
    EfficientNetVariant::B0,
    EfficientNetVariant::B1,
    EfficientNetVariant::B2,
    EfficientNetVariant::B3,
    EfficientNetVariant::B4,
    EfficientNetVariant::B5,
    EfficientNetVariant::B6,
    EfficientNetVariant::B7,
];

/// Compound scaling coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingCoefficients {
    /// Channel multiplier.
    pub width: f64,

    /// Block repeat multiplier.
    pub depth: f64,

    /// Nominal input resolution.
    pub resolution: usize,

    /// Dropout before the classifier.
    pub dropout: f64,
}

impl EfficientNetVariant {
    /// The name of the variant: "b0" to "b7".
    pub fn name(&self) -> &'static str {
        match self {
            EfficientNetVariant::B0 => "b0",
            EfficientNetVariant::B1 => "b1",
            EfficientNetVariant::B2 => "b2",
            EfficientNetVariant::B3 => "b3",
            EfficientNetVariant::B4 => "b4",
            EfficientNetVariant::B5 => "b5",
            EfficientNetVariant::B6 => "b6",
            EfficientNetVariant::B7 => "b7",
        }
    }

    /// The scaling coefficients of the variant.
    pub fn coefficients(&self) -> ScalingCoefficients {
        let (width, depth, resolution, dropout) = match self {
            EfficientNetVariant::B0 => (1.0, 1.0, 224, 0.2),
            EfficientNetVariant::B1 => (1.0, 1.1, 240, 0.2),
            EfficientNetVariant::B2 => (1.1, 1.2, 260, 0.3),
            EfficientNetVariant::B3 => (1.2, 1.4, 300, 0.3),
            EfficientNetVariant::B4 => (1.4, 1.8, 380, 0.4),
            EfficientNetVariant::B5 => (1.6, 2.2, 456, 0.4),
            EfficientNetVariant::B6 => (1.8, 2.6, 528, 0.5),
            EfficientNetVariant::B7 => (2.0, 3.1, 600, 0.5),
        };
        ScalingCoefficients {
            width,
            depth,
            resolution,
            dropout,
        }
    }
}

impl fmt::Display for EfficientNetVariant {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EfficientNetVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        EFFICIENTNET_VARIANTS
            .iter()
            .find(|variant| variant.name() == s)
            .copied()
            .ok_or_else(|| {
                let names: Vec<&str> = EFFICIENTNET_VARIANTS.iter().map(|v| v.name()).collect();
                format!(
                    "unknown efficientnet variant, choose one of: {}",
                    names.join(", ")
                )
            })
    }
}

/// One row of the block table; expanded to `num_repeat` [`super::mb_conv::MbConv`] blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbBlockArgs {
    /// Depthwise kernel size.
    pub kernel_size: usize,

    /// Repeats, before depth scaling.
    pub num_repeat: usize,

    /// Input filters, before width scaling.
    pub in_filters: usize,

    /// Output filters, before width scaling.
    pub out_filters: usize,

    /// Expansion ratio of the inverted bottleneck.
    pub expand_ratio: usize,

    /// Stride of the first repeat.
    pub stride: usize,

    /// Squeeze and excitation ratio.
    pub se_ratio: f64,
}

impl MbBlockArgs {
    /// Create a row with the default `0.25` squeeze and excitation ratio.
    pub const fn new(
        kernel_size: usize,
        num_repeat: usize,
        in_filters: usize,
        out_filters: usize,
        expand_ratio: usize,
        stride: usize,
    ) -> Self {
        Self {
            kernel_size,
            num_repeat,
            in_filters,
            out_filters,
            expand_ratio,
            stride,
            se_ratio: 0.25,
        }
    }
}

/// The `B0` block table.
pub fn default_block_args() -> Vec<MbBlockArgs> {
    vec![
        MbBlockArgs::new(3, 1, 32, 16, 1, 1),
        MbBlockArgs::new(3, 2, 16, 24, 6, 2),
        MbBlockArgs::new(5, 2, 24, 40, 6, 2),
        MbBlockArgs::new(3, 3, 40, 80, 6, 2),
        MbBlockArgs::new(5, 3, 80, 112, 6, 1),
        MbBlockArgs::new(5, 4, 112, 192, 6, 2),
        MbBlockArgs::new(3, 1, 192, 320, 6, 1),
    ]
}

/// Filters of the stem.
pub const STEM_FILTERS: usize = 32;

/// Filters of the top conv.
pub const TOP_FILTERS: usize = 1280;

/// Scale `filters` by `width` and round to a multiple of `divisor`.
///
/// The result is never below 90% of the scaled value.
pub fn round_filters(
    filters: usize,
    width: f64,
    divisor: usize,
) -> usize {
    let scaled = filters as f64 * width;
    let half = (divisor / 2) as f64;
    let rounded = ((scaled + half) as usize / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * scaled {
        rounded + divisor
    } else {
        rounded
    }
}

/// Scale `repeats` by `depth`, rounding up.
pub fn round_repeats(
    repeats: usize,
    depth: f64,
) -> usize {
    (depth * repeats as f64).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        for variant in EFFICIENTNET_VARIANTS {
            assert_eq!(variant.to_string().parse::<EfficientNetVariant>(), Ok(variant));
        }
        assert_eq!("B3".parse(), Ok(EfficientNetVariant::B3));
        assert_eq!(
            "b9".parse::<EfficientNetVariant>(),
            Err("unknown efficientnet variant, choose one of: b0, b1, b2, b3, b4, b5, b6, b7".to_string())
        );
    }

    #[test]
    fn test_coefficients() {
        let b4 = EfficientNetVariant::B4.coefficients();
        assert_eq!(b4.width, 1.4);
        assert_eq!(b4.depth, 1.8);
        assert_eq!(b4.resolution, 380);
        assert_eq!(b4.dropout, 0.4);
    }

    #[test]
    fn test_round_filters() {
        assert_eq!(round_filters(32, 1.0, 8), 32);
        assert_eq!(round_filters(32, 1.1, 8), 32);
        assert_eq!(round_filters(32, 1.4, 8), 48);
        assert_eq!(round_filters(1280, 1.4, 8), 1792);
        assert_eq!(round_filters(24, 1.2, 8), 32);
        assert_eq!(round_filters(16, 0.25, 8), 8);

        // 8 would fall below 90% of 11.
        assert_eq!(round_filters(11, 1.0, 8), 16);
    }

    #[test]
    fn test_round_repeats() {
        assert_eq!(round_repeats(1, 1.0), 1);
        assert_eq!(round_repeats(2, 1.1), 3);
        assert_eq!(round_repeats(4, 3.1), 13);

        let b7: usize = default_block_args()
            .iter()
            .map(|args| round_repeats(args.num_repeat, 3.1))
            .sum();
        assert_eq!(b7, 55);
    }
}
