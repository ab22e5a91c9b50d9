//! # `EfficientNet`
//!
//! Compound-scaled mobile inverted bottleneck networks over 1 to 4 spatial
//! dims.
//!
//! * [`mb_conv`] - the inverted bottleneck block and squeeze/excitation.
//! * [`efficientnet_model`] - the full classifier.
//! * [`prefabs`] - `B0` to `B7`, the block table and scaling rules.

pub mod efficientnet_model;
pub mod mb_conv;
pub mod prefabs;
