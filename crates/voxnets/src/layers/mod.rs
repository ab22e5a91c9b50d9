//! Common low-level modules for adding layers and operations in Burn.
pub mod blocks;
pub mod conv;
pub mod drop;
pub mod sampling;
