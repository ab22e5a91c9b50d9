//! # Ultrametric Loss
//!
//! Metric learning over a minimum spanning tree (MST) of an embedding.
//!
//! Merging the MST edges in ascending order (Kruskal) merges clusters;
//! each edge is charged with the positive (same label) and negative
//! (different label) point pairs it merges. The loss asks every positive
//! edge to be at least `alpha` shorter than every negative edge.
//!
//! * [`disjoint_sets`] - union-find.
//! * [`mst`] - MST edges and a dense Euclidean MST.
//! * [`gradient`] - host-side loss, edge gradients and pruning.
//! * [`ultrametric`] - the differentiable `burn` loss.

pub mod disjoint_sets;
pub mod gradient;
pub mod mst;
pub mod ultrametric;
