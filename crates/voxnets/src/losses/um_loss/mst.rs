//! # Minimum Spanning Trees
//!
//! [`euclidean_mst`] is a dense Prim's algorithm, `O(n^2)` in time and
//! `O(n)` in memory.

use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};

/// An edge of a spanning tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MstEdge {
    /// First node.
    pub u: usize,

    /// Second node.
    pub v: usize,

    /// Edge length.
    pub distance: f64,
}

impl MstEdge {
    /// Construct an edge.
    pub fn new(
        u: usize,
        v: usize,
        distance: f64,
    ) -> Self {
        Self { u, v, distance }
    }
}

/// Sort edges by ascending distance.
pub fn sort_edges(edges: &mut [MstEdge]) {
    edges.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}

fn squared_distance(
    a: &[f64],
    b: &[f64],
) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// The Euclidean minimum spanning tree of a point set.
///
/// # Arguments
///
/// - `points`: row-major ``[n, dims]`` coordinates.
/// - `dims`: the dimensionality of the points.
///
/// # Returns
///
/// `n - 1` edges, sorted by ascending distance.
pub fn euclidean_mst(
    points: &[f64],
    dims: usize,
) -> anyhow::Result<Vec<MstEdge>> {
    ensure!(dims > 0, "points need at least one dimension");
    if points.len() % dims != 0 {
        bail!(
            "{} coordinates do not split into {dims}-dimensional points",
            points.len()
        );
    }
    ensure!(
        points.iter().all(|x| x.is_finite()),
        "point coordinates must be finite"
    );

    let n = points.len() / dims;
    let point = |i: usize| &points[i * dims..(i + 1) * dims];
    if n < 2 {
        return Ok(vec![]);
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut best_from = vec![0; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[current] = true;
    for _ in 1..n {
        let mut next = None;
        for i in 0..n {
            if in_tree[i] {
                continue;
            }
            let d = squared_distance(point(current), point(i));
            if d < best[i] {
                best[i] = d;
                best_from[i] = current;
            }
            if next.is_none_or(|j: usize| best[i] < best[j]) {
                next = Some(i);
            }
        }

        let Some(next) = next else {
            break;
        };
        in_tree[next] = true;
        edges.push(MstEdge::new(best_from[next], next, best[next].sqrt()));
        current = next;
    }

    sort_edges(&mut edges);
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line() {
        let edges = euclidean_mst(&[0.0, 3.0, 1.0, 10.0], 1).unwrap();
        assert_eq!(
            edges,
            vec![
                MstEdge::new(0, 2, 1.0),
                MstEdge::new(2, 1, 2.0),
                MstEdge::new(1, 3, 7.0),
            ]
        );
    }

    #[test]
    fn test_plane() {
        #[rustfmt::skip]
        let points = [
            0.0, 0.0,
            0.0, 1.0,
            5.0, 5.0,
            3.0, 4.0,
        ];
        let edges = euclidean_mst(&points, 2).unwrap();
        assert_eq!(edges.len(), 3);

        let total: f64 = edges.iter().map(|e| e.distance).sum();
        let expected = 1.0 + 5.0_f64.sqrt() + 18.0_f64.sqrt();
        assert!((total - expected).abs() < 1e-12);
        assert!(edges.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_degenerate() {
        assert_eq!(euclidean_mst(&[], 3).unwrap(), vec![]);
        assert_eq!(euclidean_mst(&[1.0, 2.0], 2).unwrap(), vec![]);
        assert!(euclidean_mst(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(euclidean_mst(&[1.0], 0).is_err());
        assert!(euclidean_mst(&[f64::NAN, 0.0], 1).is_err());
    }
}
