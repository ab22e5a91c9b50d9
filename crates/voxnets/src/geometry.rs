//! # Spatial Geometry
//!
//! [`Geometry`] tracks, per spatial dimension, the feature map shape, the
//! field of view (in physical units) of one output voxel, and the voxel size
//! (in physical units) of the feature map.
//!
//! Every windowed operation with effective kernel ``e`` grows the field of
//! view by ``(e - 1) * voxel_size``; strides multiply the voxel size;
//! upsampling divides it.

use crate::compat::conv_shape::{PaddingMode, effective_kernel_size, maybe_conv_output_shape_dyn};
use serde::{Deserialize, Serialize};

/// Broadcast a per-dimension argument to `n` dims.
///
/// A single value is repeated; otherwise the length must match.
///
/// # Panics
///
/// If `values` has neither 1 nor `n` entries.
pub fn broadcast_dims(
    values: &[usize],
    n: usize,
) -> Vec<usize> {
    match values.len() {
        1 => vec![values[0]; n],
        len if len == n => values.to_vec(),
        len => panic!("expected 1 or {n} per-dimension values, got {len}: {values:?}"),
    }
}

/// Spatial metadata of a feature map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Spatial shape, in voxels.
    pub shape: Vec<usize>,

    /// Field of view of one voxel, in physical units.
    pub fov: Vec<usize>,

    /// Voxel size, in physical units.
    pub voxel_size: Vec<usize>,
}

impl Geometry {
    /// Construct the geometry of a network input.
    ///
    /// The field of view starts at 1 (one voxel) in every dim.
    ///
    /// # Arguments
    ///
    /// - `shape`: the spatial shape.
    /// - `voxel_size`: aligned with the *trailing* dims of `shape`;
    ///   uncovered leading dims (e.g. time) get voxel size 1.
    ///
    /// # Returns
    ///
    /// An error if `voxel_size` is longer than `shape`, or anything is 0.
    pub fn try_new(
        shape: Vec<usize>,
        voxel_size: &[usize],
    ) -> Result<Self, String> {
        let n = shape.len();
        if n == 0 {
            return Err("shape needs at least one spatial dim".to_string());
        }
        if voxel_size.len() > n {
            return Err(format!(
                "voxel size {voxel_size:?} has more dims than shape {shape:?}"
            ));
        }
        if shape.iter().chain(voxel_size).any(|&v| v == 0) {
            return Err(format!(
                "shape {shape:?} and voxel size {voxel_size:?} must be positive"
            ));
        }
        let mut full_voxel_size = vec![1; n - voxel_size.len()];
        full_voxel_size.extend_from_slice(voxel_size);

        Ok(Self {
            shape,
            fov: vec![1; n],
            voxel_size: full_voxel_size,
        })
    }

    /// Construct the geometry of a network input.
    ///
    /// # Panics
    ///
    /// Where [`Geometry::try_new`] would return an error.
    pub fn new(
        shape: Vec<usize>,
        voxel_size: &[usize],
    ) -> Self {
        match Self::try_new(shape, voxel_size) {
            Ok(geometry) => geometry,
            Err(err) => panic!("{err}"),
        }
    }

    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.shape.len()
    }

    /// The number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape.iter().product()
    }

    /// Geometry after a convolution.
    ///
    /// # Arguments
    ///
    /// - `kernel_size`: per-dim (or broadcast) kernel size.
    /// - `stride`: per-dim (or broadcast) stride.
    /// - `dilation`: per-dim (or broadcast) dilation.
    /// - `padding`: the padding policy.
    ///
    /// # Returns
    ///
    /// The output geometry; or an error if a ``valid`` window does not fit.
    pub fn try_conv(
        &self,
        kernel_size: &[usize],
        stride: &[usize],
        dilation: &[usize],
        padding: PaddingMode,
    ) -> Result<Self, String> {
        let n = self.spatial_dims();
        let kernel_size = broadcast_dims(kernel_size, n);
        let stride = broadcast_dims(stride, n);
        let dilation = broadcast_dims(dilation, n);

        let shape =
            maybe_conv_output_shape_dyn(&self.shape, &kernel_size, &stride, &dilation, padding)
                .ok_or_else(|| {
                    format!(
                        "kernel {kernel_size:?} (dilation {dilation:?}) does not fit shape {:?}",
                        self.shape
                    )
                })?;

        let mut result = Self {
            shape,
            ..self.clone()
        };
        for i in 0..n {
            let effective = effective_kernel_size(kernel_size[i], dilation[i]);
            result.fov[i] += (effective - 1) * self.voxel_size[i];
            result.voxel_size[i] *= stride[i];
        }
        Ok(result)
    }

    /// Geometry after a convolution.
    ///
    /// # Panics
    ///
    /// If [`Geometry::try_conv`] fails.
    pub fn conv(
        &self,
        kernel_size: &[usize],
        stride: &[usize],
        dilation: &[usize],
        padding: PaddingMode,
    ) -> Self {
        match self.try_conv(kernel_size, stride, dilation, padding) {
            Ok(geometry) => geometry,
            Err(err) => panic!("{err}"),
        }
    }

    /// Geometry after a ``valid`` pooling window.
    pub fn pool(
        &self,
        kernel_size: &[usize],
        stride: &[usize],
    ) -> Self {
        self.conv(kernel_size, stride, &[1], PaddingMode::Valid)
    }

    /// Geometry after a non-overlapping downsample by `factors`.
    ///
    /// # Returns
    ///
    /// An error unless every dim is divisible by its factor; otherwise
    /// outputs would not be translation equivariant.
    pub fn try_downsample(
        &self,
        factors: &[usize],
    ) -> Result<Self, String> {
        let factors = broadcast_dims(factors, self.spatial_dims());
        if self
            .shape
            .iter()
            .zip(&factors)
            .any(|(&size, &factor)| factor == 0 || size % factor != 0)
        {
            return Err(format!(
                "cannot downsample shape {:?} with factors {factors:?}",
                self.shape
            ));
        }
        Ok(self.pool(&factors, &factors))
    }

    /// Geometry after upsampling by `factors`.
    ///
    /// # Panics
    ///
    /// If a voxel size is not divisible by its factor.
    pub fn upsample(
        &self,
        factors: &[usize],
    ) -> Self {
        let factors = broadcast_dims(factors, self.spatial_dims());
        let mut result = self.clone();
        for (i, &factor) in factors.iter().enumerate() {
            assert!(
                factor > 0 && self.voxel_size[i] % factor == 0,
                "cannot upsample voxel size {:?} with factors {factors:?}",
                self.voxel_size
            );
            result.shape[i] *= factor;
            result.voxel_size[i] /= factor;
        }
        result
    }

    /// Geometry after a center crop to `shape`.
    pub fn try_crop(
        &self,
        shape: &[usize],
    ) -> Result<Self, String> {
        if shape.len() != self.spatial_dims()
            || shape.iter().zip(&self.shape).any(|(&t, &s)| t > s)
        {
            return Err(format!("cannot crop shape {:?} to {shape:?}", self.shape));
        }
        Ok(Self {
            shape: shape.to_vec(),
            ..self.clone()
        })
    }
}
