//! # Ultrametric Loss over `burn` embeddings.
//!
//! The MST and the pair ratios are computed on the host and held constant;
//! the loss is differentiable through the MST edge distances.

use crate::losses::um_loss::gradient::{UmLossGradient, um_loss_gradient};
use crate::losses::um_loss::mst::{MstEdge, euclidean_mst};
use anyhow::{anyhow, ensure};
use burn::prelude::{Backend, Config, Int, Module, Tensor, TensorData};
use burn::tensor::activation::relu;

/// Added under the square root of edge distances, so coincident points keep a gradient.
pub const DISTANCE_EPSILON: f64 = 1e-12;

/// [`UltrametricLoss`] Config.
#[derive(Config, Debug)]
pub struct UltrametricLossConfig {
    /// Margin between positive and negative edge distances.
    #[config(default = 0.1)]
    pub alpha: f64,
}

impl UltrametricLossConfig {
    /// Initialize an [`UltrametricLoss`].
    pub fn init(&self) -> UltrametricLoss {
        assert!(
            self.alpha.is_finite() && self.alpha >= 0.0,
            "alpha must be a non-negative margin, got {}",
            self.alpha
        );
        UltrametricLoss { alpha: self.alpha }
    }
}

/// The result of an [`UltrametricLoss`] evaluation.
#[derive(Debug, Clone)]
pub struct UltrametricLossOutput<B: Backend> {
    /// ``[1]`` differentiable loss.
    pub loss: Tensor<B, 1>,

    /// ``[edges]`` differentiable MST edge distances.
    pub distances: Tensor<B, 1>,

    /// The MST, sorted by ascending distance.
    pub mst: Vec<MstEdge>,

    /// Host-side loss, gradients and pair statistics.
    pub stats: UmLossGradient,
}

/// Ultrametric (MST) metric learning loss.
#[derive(Module, Clone, Debug)]
pub struct UltrametricLoss {
    /// Margin between positive and negative edge distances.
    pub alpha: f64,
}

impl UltrametricLoss {
    /// Evaluate the loss of one embedding.
    ///
    /// # Arguments
    ///
    /// - `embedding`: ``[channels, spatial...]``.
    /// - `gt_seg`: the label of every voxel, in row-major spatial order.
    ///
    /// # Returns
    ///
    /// An error if the labels do not match the embedding.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        embedding: Tensor<B, D>,
        gt_seg: &[i64],
    ) -> anyhow::Result<UltrametricLossOutput<B>> {
        let dims = embedding.dims();
        let channels = dims[0];
        let num_points: usize = dims[1..].iter().product();
        ensure!(
            gt_seg.len() == num_points,
            "expected {num_points} labels for embedding {dims:?}, got {}",
            gt_seg.len()
        );
        let device = embedding.device();

        // [points, channels]
        let points: Tensor<B, 2> = embedding.reshape([channels, num_points]).transpose();

        let host = points
            .clone()
            .into_data()
            .convert::<f64>()
            .to_vec::<f64>()
            .map_err(|err| anyhow!("cannot read embedding: {err:?}"))?;
        let mst = euclidean_mst(&host, channels)?;
        let stats = um_loss_gradient(&mst, gt_seg, self.alpha)?;

        let edges = mst.len();
        if edges == 0 {
            return Ok(UltrametricLossOutput {
                loss: Tensor::zeros([1], &device),
                distances: Tensor::zeros([0], &device),
                mst,
                stats,
            });
        }

        let index = |node: fn(&MstEdge) -> usize| -> Tensor<B, 1, Int> {
            let nodes: Vec<i64> = mst.iter().map(|edge| node(edge) as i64).collect();
            Tensor::from_data(TensorData::new(nodes, [edges]), &device)
        };
        let diff = points.clone().select(0, index(|e| e.u)) - points.select(0, index(|e| e.v));
        let distances: Tensor<B, 1> = diff
            .powi_scalar(2)
            .sum_dim(1)
            .add_scalar(DISTANCE_EPSILON)
            .sqrt()
            .reshape([edges]);

        let ratio_pos: Tensor<B, 2> = Tensor::<B, 1>::from_data(
            TensorData::new(stats.ratio_pos.clone(), [edges]),
            &device,
        )
        .reshape([edges, 1]);
        let ratio_neg: Tensor<B, 2> = Tensor::<B, 1>::from_data(
            TensorData::new(stats.ratio_neg.clone(), [edges]),
            &device,
        )
        .reshape([1, edges]);

        // [positive edge j, negative edge k]
        let margins = relu(
            distances.clone().reshape([edges, 1]).add_scalar(self.alpha)
                - distances.clone().reshape([1, edges]),
        );
        let loss = (margins.powi_scalar(2) * ratio_pos * ratio_neg).sum();

        Ok(UltrametricLossOutput {
            loss,
            distances,
            mst,
            stats,
        })
    }
}
