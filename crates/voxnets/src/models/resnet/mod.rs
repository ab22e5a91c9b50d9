//! # `ResNet`
//!
//! Pre-activation ("v2") residual networks over 1 to 4 spatial dims,
//! with field of view and voxel size tracking.
//!
//! * [`residual_block`] - a single resolved residual block.
//! * [`stack`] - planning and running a stack of residual blocks.
//! * [`stems`] - the input convolution.
//! * [`resnet_model`] - the full classifier.
//! * [`prefabs`] - well known depths.

pub mod prefabs;
pub mod residual_block;
pub mod resnet_model;
pub mod stack;
pub mod stems;
