//! # Compatibility adapters over ``burn``.
//!
//! ``burn`` layers are fixed-rank (``Conv2d`` takes rank-4 tensors, etc.);
//! the models in this crate are rank-generic. These modules bridge the two.
pub mod activation_wrapper;
pub mod conv_shape;
pub mod normalization_wrapper;
pub mod rank;
