//! # Spatial sampling: pooling, upsampling, cropping.
pub mod crop;
pub mod global_pool;
pub mod pool;
pub mod repeat;
pub mod upsample;
