//! # Residual Stack
//!
//! A [`ResidualStack`] is a sequence of [`ResidualBlock`]s sharing an inner
//! fmap count.
//!
//! [`ResidualStackConfig::plan`] resolves a [`ResidualStackOptions`] against
//! an input [`Geometry`]:
//! * block 1 has a conv shortcut and stride 1,
//! * middle blocks have identity shortcuts and stride 1,
//! * the last block carries `stride1`.
//!
//! A stack of one block is a single block with a conv shortcut and `stride1`.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::geometry::Geometry;
use crate::models::resnet::residual_block::{BlockKind, ResidualBlock, ResidualBlockConfig};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// Options for planning a [`ResidualStackConfig`].
#[derive(Config, Debug)]
pub struct ResidualStackOptions {
    /// Inner fmaps of every block.
    pub fmaps: usize,

    /// Number of blocks.
    pub num_blocks: usize,

    /// Stride of the last block.
    #[config(default = 2)]
    pub stride1: usize,

    /// Use bottleneck blocks.
    #[config(default = false)]
    pub use_bottleneck: bool,

    /// This is the first stack of the network; its first block skips
    /// pre-activation.
    #[config(default = false)]
    pub is_first_stack: bool,

    /// Padding policy.
    #[config(default = "PaddingMode::Same")]
    pub padding: PaddingMode,

    /// Keep the third-to-last dim unstrided until the data is roughly isotropic.
    #[config(default = false)]
    pub make_iso: bool,

    /// Collapse time once `voxel_size[-1]` reaches this size.
    #[config(default = "None")]
    pub merge_time_voxel_size: Option<usize>,

    /// Dropout after each strided conv.
    #[config(default = 0.0)]
    pub dropout: f64,

    /// Optional normalization.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl ResidualStackOptions {
    /// The block layout.
    pub fn kind(&self) -> BlockKind {
        if self.use_bottleneck {
            BlockKind::Bottleneck
        } else {
            BlockKind::Basic
        }
    }

    /// Output channels of the stack.
    pub fn out_channels(&self) -> usize {
        self.fmaps * self.kind().expansion()
    }
}

/// Resolve per-dim strides for a block.
///
/// * `make_iso`: with 3 or more spatial dims, when the last dim is strided
///   and ``shape[-3] * 2 <= shape[-1]``, dim ``-3`` is not strided.
/// * With 4 spatial dims, time is never strided.
pub fn resolve_strides(
    stride: usize,
    geometry: &Geometry,
    make_iso: bool,
) -> Vec<usize> {
    let n = geometry.spatial_dims();
    let shape = &geometry.shape;
    let mut strides = vec![stride; n];
    if make_iso && n >= 3 && strides[n - 1] > 1 && shape[n - 3] * 2 <= shape[n - 1] {
        strides[n - 3] = 1;
    }
    if n == 4 {
        strides[0] = 1;
    }
    strides
}

/// Should a block collapse the time axis before its convolutions?
///
/// Requires ``Same`` padding, 4 spatial dims, more than one frame, and
/// ``voxel_size[-1] >= merge_time_voxel_size``.
pub fn should_merge_time(
    padding: PaddingMode,
    merge_time_voxel_size: Option<usize>,
    geometry: &Geometry,
) -> bool {
    let n = geometry.spatial_dims();
    match merge_time_voxel_size {
        Some(threshold) => {
            padding == PaddingMode::Same
                && n == 4
                && geometry.shape[0] > 1
                && geometry.voxel_size[n - 1] >= threshold
        }
        None => false,
    }
}

/// [`ResidualStack`] Configuration.
#[derive(Config, Debug)]
pub struct ResidualStackConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for ResidualStackConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl ResidualStackConfig {
    /// Plan a stack against an input geometry.
    ///
    /// # Arguments
    ///
    /// - `options`: the stack options.
    /// - `in_channels`: channels entering the stack.
    /// - `input`: geometry entering the stack.
    ///
    /// # Returns
    ///
    /// The resolved config and the output geometry.
    pub fn plan(
        options: &ResidualStackOptions,
        in_channels: usize,
        input: &Geometry,
    ) -> Result<(Self, Geometry), String> {
        if options.num_blocks == 0 {
            return Err("a residual stack needs at least one block".to_string());
        }
        let last = options.num_blocks - 1;

        let mut geometry = input.clone();
        let mut in_channels = in_channels;
        let mut blocks = Vec::with_capacity(options.num_blocks);

        for idx in 0..options.num_blocks {
            let merge_time_frames =
                should_merge_time(options.padding, options.merge_time_voxel_size, &geometry)
                    .then(|| geometry.shape[0]);
            let merged = match merge_time_frames {
                Some(frames) => {
                    geometry.try_conv(&[frames, 1, 1, 1], &[1], &[1], PaddingMode::Valid)?
                }
                None => geometry.clone(),
            };

            let stride = if idx == last { options.stride1 } else { 1 };
            let strides = resolve_strides(stride, &merged, options.make_iso);

            let block = ResidualBlockConfig::new(in_channels, options.fmaps, strides)
                .with_kind(options.kind())
                .with_conv_shortcut(idx == 0)
                .with_pre_activation(!(idx == 0 && options.is_first_stack))
                .with_dropout(options.dropout)
                .with_merge_time_frames(merge_time_frames)
                .with_padding(options.padding)
                .with_norm(options.norm.clone())
                .with_act(options.act.clone());
            block.try_validate()?;

            geometry = block.output_geometry(&geometry)?;
            tracing::info!(
                block = idx + 1,
                strides = ?block.strides,
                merge_time = ?block.merge_time_frames,
                shape = ?geometry.shape,
                fov = ?geometry.fov,
                voxel_size = ?geometry.voxel_size,
                "planned residual block"
            );

            in_channels = block.out_channels();
            blocks.push(block);
        }

        Ok((Self { blocks }, geometry))
    }

    /// The number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.blocks[0].in_channels
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_channels()
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }
        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_channels() != curr.in_channels {
                return Err(format!(
                    "block[{}].out_channels({}) != block[{}].in_channels({})",
                    idx - 1,
                    prev.out_channels(),
                    idx,
                    curr.in_channels,
                ));
            }
        }
        self.blocks.iter().try_for_each(|block| block.try_validate())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Propagate a [`Geometry`] through every block.
    pub fn output_geometry(
        &self,
        input: &Geometry,
    ) -> Result<Geometry, String> {
        self.blocks
            .iter()
            .try_fold(input.clone(), |geometry, block| {
                block.output_geometry(&geometry)
            })
    }

    /// Initialize a new [`ResidualStack`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualStack<B> {
        self.expect_valid();
        ResidualStack {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// A sequence of residual blocks.
#[derive(Module, Debug)]
pub struct ResidualStack<B: Backend> {
    /// The blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResidualStack<B> {
    /// Forward pass.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_resolve_strides() {
        let flat = Geometry::new(vec![8, 64, 64], &[40, 4, 4]);
        assert_eq!(resolve_strides(2, &flat, true), vec![1, 2, 2]);
        assert_eq!(resolve_strides(2, &flat, false), vec![2, 2, 2]);
        assert_eq!(resolve_strides(1, &flat, true), vec![1, 1, 1]);

        let iso = Geometry::new(vec![40, 64, 64], &[1]);
        assert_eq!(resolve_strides(2, &iso, true), vec![2, 2, 2]);

        let video = Geometry::new(vec![5, 8, 64, 64], &[1]);
        assert_eq!(resolve_strides(2, &video, true), vec![1, 1, 2, 2]);
        assert_eq!(resolve_strides(2, &video, false), vec![1, 2, 2, 2]);

        let planar = Geometry::new(vec![4, 64], &[1]);
        assert_eq!(resolve_strides(2, &planar, true), vec![2, 2]);
    }

    #[test]
    fn test_should_merge_time() {
        let video = Geometry::new(vec![5, 8, 8, 8], &[4, 4, 4]);
        assert!(should_merge_time(PaddingMode::Same, Some(4), &video));
        assert!(!should_merge_time(PaddingMode::Same, Some(8), &video));
        assert!(!should_merge_time(PaddingMode::Valid, Some(4), &video));
        assert!(!should_merge_time(PaddingMode::Same, None, &video));

        let single = Geometry::new(vec![1, 8, 8, 8], &[4, 4, 4]);
        assert!(!should_merge_time(PaddingMode::Same, Some(4), &single));

        let volume = Geometry::new(vec![8, 8, 8], &[4, 4, 4]);
        assert!(!should_merge_time(PaddingMode::Same, Some(4), &volume));
    }

    #[test]
    fn test_plan_block_roles() {
        let options = ResidualStackOptions::new(8, 3).with_is_first_stack(true);
        let (config, geometry) =
            ResidualStackConfig::plan(&options, 4, &Geometry::new(vec![16, 16], &[1])).unwrap();

        assert_eq!(config.len(), 3);
        assert_eq!(config.in_channels(), 4);
        assert_eq!(config.out_channels(), 8);

        let blocks = &config.blocks;
        assert!(blocks[0].conv_shortcut);
        assert!(!blocks[0].pre_activation);
        assert_eq!(blocks[0].strides, vec![1, 1]);
        assert!(!blocks[1].conv_shortcut);
        assert!(blocks[1].pre_activation);
        assert_eq!(blocks[1].strides, vec![1, 1]);
        assert!(!blocks[2].conv_shortcut);
        assert_eq!(blocks[2].strides, vec![2, 2]);

        assert_eq!(geometry.shape, vec![8, 8]);
        assert_eq!(geometry.voxel_size, vec![2, 2]);
        // five 3x3 convs at voxel size 1, then one at voxel size 2.
        assert_eq!(geometry.fov, vec![15, 15]);
        assert_eq!(config.output_geometry(&Geometry::new(vec![16, 16], &[1])), Ok(geometry));
    }

    #[test]
    fn test_plan_single_block() {
        let options = ResidualStackOptions::new(2, 1).with_use_bottleneck(true);
        let (config, geometry) =
            ResidualStackConfig::plan(&options, 3, &Geometry::new(vec![8], &[1])).unwrap();
        assert_eq!(config.len(), 1);
        assert!(config.blocks[0].conv_shortcut);
        assert_eq!(config.blocks[0].strides, vec![2]);
        assert_eq!(config.out_channels(), 8);
        assert_eq!(geometry.shape, vec![4]);
    }

    #[test]
    fn test_plan_merges_time_once() {
        let options = ResidualStackOptions::new(2, 3)
            .with_stride1(1)
            .with_merge_time_voxel_size(Some(2));
        let (config, geometry) = ResidualStackConfig::plan(
            &options,
            2,
            &Geometry::new(vec![3, 4, 4, 4], &[2, 2, 2]),
        )
        .unwrap();
        assert_eq!(config.blocks[0].merge_time_frames, Some(3));
        assert_eq!(config.blocks[1].merge_time_frames, None);
        assert_eq!(config.blocks[2].merge_time_frames, None);
        assert_eq!(geometry.shape, vec![1, 4, 4, 4]);
    }

    #[test]
    fn test_plan_errors() {
        let input = Geometry::new(vec![8, 8], &[1]);
        assert!(
            ResidualStackConfig::plan(&ResidualStackOptions::new(4, 0), 4, &input).is_err()
        );
        let options = ResidualStackOptions::new(4, 2).with_padding(PaddingMode::Valid);
        assert!(
            ResidualStackConfig::plan(&options, 4, &Geometry::new(vec![6, 6], &[1])).is_err()
        );
    }

    #[test]
    fn test_validate_channel_chain() {
        let config = ResidualStackConfig::from(vec![
            ResidualBlockConfig::new(4, 8, vec![1]).with_conv_shortcut(true),
            ResidualBlockConfig::new(4, 4, vec![1]),
        ]);
        assert!(config.try_validate().unwrap_err().contains("block[0].out_channels(8)"));
    }

    #[test]
    fn test_forward_matches_plan() {
        type B = NdArray<f32>;
        let device = Default::default();

        let options = ResidualStackOptions::new(4, 2).with_make_iso(true);
        let input_geometry = Geometry::new(vec![4, 16, 16], &[4, 1, 1]);
        let (config, geometry) = ResidualStackConfig::plan(&options, 2, &input_geometry).unwrap();
        assert_eq!(config.blocks[1].strides, vec![1, 2, 2]);

        let stack: ResidualStack<B> = config.init(&device);
        let input: Tensor<B, 5> = Tensor::random([1, 2, 4, 16, 16], Distribution::Default, &device);
        let output = stack.forward(input);
        assert_eq!(output.dims()[1], 4);
        assert_eq!(output.dims()[2..].to_vec(), geometry.shape);
    }
}
