//! # Losses.
//!
//! * [`um_loss`] - the ultrametric (minimum spanning tree) metric learning loss.
pub mod um_loss;
