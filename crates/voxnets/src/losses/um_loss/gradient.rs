//! # Ultrametric Loss Gradient
//!
//! Host-side evaluation of the ultrametric loss over a sorted MST:
//!
//! ``loss = sum_jk pos_j * neg_k * relu(d_j + alpha - d_k)^2``
//!
//! where `pos_j` (`neg_k`) is the normalized number of positive (negative)
//! pairs merged by edge `j` (`k`).
//!
//! Label classes: `n >= 1` foreground, `0` background, `-1` ambiguous
//! foreground. `(n, n)` pairs are positive; `(n, m)`, `(n, 0)` and `(0, -1)`
//! pairs are negative; `(n, -1)`, `(0, 0)` and `(-1, -1)` are ignored.

use crate::losses::um_loss::disjoint_sets::DisjointSets;
use crate::losses::um_loss::mst::MstEdge;
use anyhow::{Context, bail, ensure};
use std::collections::BTreeMap;

/// Loss, gradients and pair statistics of [`um_loss_gradient`].
#[derive(Debug, Clone, PartialEq)]
pub struct UmLossGradient {
    /// The loss.
    pub loss: f64,

    /// The gradient of the loss with respect to each edge distance.
    pub gradients: Vec<f64>,

    /// Normalized positive pairs merged by each edge.
    pub ratio_pos: Vec<f64>,

    /// Normalized negative pairs merged by each edge.
    pub ratio_neg: Vec<f64>,

    /// Total positive pairs.
    pub num_pairs_pos: f64,

    /// Total negative pairs.
    pub num_pairs_neg: f64,
}

/// The positive and negative pairs between two clusters, from their label counts.
fn count_pairs(
    a: &BTreeMap<i64, usize>,
    b: &BTreeMap<i64, usize>,
) -> (f64, f64) {
    let mut pos = 0.0;
    let mut neg = 0.0;
    for (&label_a, &count_a) in a {
        for (&label_b, &count_b) in b {
            let pairs = (count_a * count_b) as f64;
            if label_a >= 1 && label_a == label_b {
                pos += pairs;
            } else if label_a >= 1 && label_b >= 1 {
                neg += pairs;
            }
            if (label_a == 0) != (label_b == 0) {
                neg += pairs;
            }
        }
    }
    (pos, neg)
}

fn check_sorted(mst: &[MstEdge]) -> anyhow::Result<()> {
    if let Some(i) = mst
        .windows(2)
        .position(|w| w[0].distance.partial_cmp(&w[1].distance).is_none_or(|o| o.is_gt()))
    {
        bail!(
            "mst edges must be sorted by ascending distance: edge {} ({}) > edge {} ({})",
            i,
            mst[i].distance,
            i + 1,
            mst[i + 1].distance
        );
    }
    Ok(())
}

/// Count the positive and negative pairs merged by each MST edge.
///
/// # Returns
///
/// The unnormalized ``(pos, neg)`` counts per edge.
pub fn count_merged_pairs(
    mst: &[MstEdge],
    gt_seg: &[i64],
) -> anyhow::Result<(Vec<f64>, Vec<f64>)> {
    let n = gt_seg.len();
    ensure!(
        mst.len() + 1 == n || (n == 0 && mst.is_empty()),
        "an mst over {n} nodes needs {} edges, got {}",
        n.saturating_sub(1),
        mst.len()
    );

    let mut clusters = DisjointSets::new(n);
    let mut overlaps: Vec<BTreeMap<i64, usize>> =
        gt_seg.iter().map(|&label| BTreeMap::from([(label, 1)])).collect();

    let mut pos = Vec::with_capacity(mst.len());
    let mut neg = Vec::with_capacity(mst.len());
    for (i, edge) in mst.iter().enumerate() {
        ensure!(
            edge.u < n && edge.v < n,
            "edge {i} ({}, {}) is out of range for {n} nodes",
            edge.u,
            edge.v
        );
        let cluster_u = clusters.find(edge.u);
        let cluster_v = clusters.find(edge.v);
        let root = clusters
            .union(cluster_u, cluster_v)
            .with_context(|| format!("edge {i} ({}, {}) closes a cycle", edge.u, edge.v))?;
        let child = if root == cluster_u {
            cluster_v
        } else {
            cluster_u
        };

        let (p, q) = count_pairs(&overlaps[root], &overlaps[child]);
        pos.push(p);
        neg.push(q);

        for (label, count) in std::mem::take(&mut overlaps[child]) {
            *overlaps[root].entry(label).or_insert(0) += count;
        }
    }
    Ok((pos, neg))
}

fn prefix_sums(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut sums = vec![0.0];
    for value in values {
        sums.push(sums[sums.len() - 1] + value);
    }
    sums
}

/// Compute the ultrametric loss and its gradient with respect to the edge distances.
///
/// # Arguments
///
/// - `mst`: `n - 1` edges, sorted by ascending distance.
/// - `gt_seg`: the label of each of the `n` nodes.
/// - `alpha`: the margin between positive and negative distances.
///
/// # Returns
///
/// An error if the MST is malformed.
pub fn um_loss_gradient(
    mst: &[MstEdge],
    gt_seg: &[i64],
    alpha: f64,
) -> anyhow::Result<UmLossGradient> {
    ensure!(
        alpha.is_finite() && alpha >= 0.0,
        "alpha must be a non-negative margin, got {alpha}"
    );
    check_sorted(mst)?;
    let (mut ratio_pos, mut ratio_neg) = count_merged_pairs(mst, gt_seg)?;

    let num_pairs_pos: f64 = ratio_pos.iter().sum();
    let num_pairs_neg: f64 = ratio_neg.iter().sum();
    if num_pairs_pos > 0.0 {
        ratio_pos.iter_mut().for_each(|r| *r /= num_pairs_pos);
    }
    if num_pairs_neg > 0.0 {
        ratio_neg.iter_mut().for_each(|r| *r /= num_pairs_neg);
    }

    let d: Vec<f64> = mst.iter().map(|edge| edge.distance).collect();
    let edges = d.len();

    // Sums of neg, neg * d and neg * d^2 over the edges before each index.
    let neg_a = prefix_sums(ratio_neg.iter().copied());
    let neg_b = prefix_sums(ratio_neg.iter().zip(&d).map(|(r, d)| r * d));
    let neg_c = prefix_sums(ratio_neg.iter().zip(&d).map(|(r, d)| r * d * d));
    // Sums of pos and pos * d over the edges before each index.
    let pos_d = prefix_sums(ratio_pos.iter().copied());
    let pos_e = prefix_sums(ratio_pos.iter().zip(&d).map(|(r, d)| r * d));

    let mut loss = 0.0;
    let mut gradients = vec![0.0; edges];

    // `upper`: first edge with d > d_i + alpha; `lower`: first edge with d >= d_i - alpha.
    let mut upper = 0;
    let mut lower = 0;
    for i in 0..edges {
        while upper < edges && d[upper] <= d[i] + alpha {
            upper += 1;
        }
        while lower < edges && d[lower] < d[i] - alpha {
            lower += 1;
        }

        // Negative edges k with d_k < d_i + alpha.
        let a = neg_a[upper];
        let b = neg_b[upper];
        let c = neg_c[upper];
        let m = d[i] + alpha;
        loss += ratio_pos[i] * (m * m * a - 2.0 * m * b + c);

        // Positive edges j with d_j > d_i - alpha.
        let pd = pos_d[edges] - pos_d[lower];
        let pe = pos_e[edges] - pos_e[lower];

        gradients[i] = 2.0
            * ratio_pos[i]
            * (m * (a - ratio_neg[i]) - (b - d[i] * ratio_neg[i]))
            - 2.0
                * ratio_neg[i]
                * ((alpha - d[i]) * (pd - ratio_pos[i]) + (pe - d[i] * ratio_pos[i]));
    }

    Ok(UmLossGradient {
        loss,
        gradients,
        ratio_pos,
        ratio_neg,
        num_pairs_pos,
        num_pairs_neg,
    })
}

/// Keep only the MST edges that merge distinct components.
///
/// # Arguments
///
/// - `mst`: edges in merge order.
/// - `labels`: the component label of every node.
/// - `components`: the distinct component labels.
///
/// # Returns
///
/// `components.len() - 1` edges; an error if a label is not a component,
/// or the edges do not connect every component.
pub fn prune_mst(
    mst: &[MstEdge],
    labels: &[i64],
    components: &[i64],
) -> anyhow::Result<Vec<MstEdge>> {
    let indices: BTreeMap<i64, usize> = components
        .iter()
        .enumerate()
        .map(|(i, &label)| (label, i))
        .collect();
    ensure!(
        indices.len() == components.len(),
        "components must be distinct: {components:?}"
    );

    let component_of = |node: usize| -> anyhow::Result<usize> {
        let label = labels
            .get(node)
            .with_context(|| format!("node {node} is out of range for {} labels", labels.len()))?;
        indices
            .get(label)
            .copied()
            .with_context(|| format!("label {label} of node {node} is not a component"))
    };

    let mut sets = DisjointSets::new(components.len());
    let mut pruned = Vec::with_capacity(components.len().saturating_sub(1));
    for edge in mst {
        let u = component_of(edge.u)?;
        let v = component_of(edge.v)?;
        if sets.union(u, v).is_some() {
            pruned.push(*edge);
        }
    }

    ensure!(
        pruned.len() + 1 == components.len(),
        "expected {} edges between {} components, got {}",
        components.len().saturating_sub(1),
        components.len(),
        pruned.len()
    );
    Ok(pruned)
}
