//! # `U-Net`
//!
//! A `U-Net` over 1 to 4 spatial dims.
//!
//! Level `l` has ``num_fmaps * prod(fmap_inc_factors[..l])`` fmaps. Each level
//! runs a left [`ConvPass`], then max-pool downsamples into the next level.
//! Each head then walks back up: upsample, crop-and-merge with the left
//! output of the level, and a right [`ConvPass`].

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::conv_shape::PaddingMode;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::geometry::{Geometry, broadcast_dims};
use crate::layers::blocks::conv_pass::{ConvPass, ConvPassConfig};
use crate::layers::sampling::crop::crop_and_merge;
use crate::layers::sampling::pool::{MaxPoolNd, MaxPoolNdConfig};
use crate::layers::sampling::upsample::{Upsample, UpsampleConfig, UpsampleMode};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`UNet`] Config.
#[derive(Config, Debug)]
pub struct UNetConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Fmaps of the top level.
    pub num_fmaps: usize,

    /// Fmap multiplier between levels; one entry, or one per downsample.
    pub fmap_inc_factors: Vec<usize>,

    /// Per-level downsample factors.
    pub downsample_factors: Vec<Vec<usize>>,

    /// Spatial shape of the input.
    pub input_shape: Vec<usize>,

    /// Kernel sizes of the left conv passes, per level.
    #[config(default = "None")]
    pub kernel_size_down: Option<Vec<Vec<Vec<usize>>>>,

    /// Kernel sizes of the right conv passes, per level (top first).
    #[config(default = "None")]
    pub kernel_size_up: Option<Vec<Vec<Vec<usize>>>>,

    /// Padding policy.
    #[config(default = "PaddingMode::Valid")]
    pub padding: PaddingMode,

    /// Upsample by repetition instead of transposed convs.
    #[config(default = false)]
    pub constant_upsample: bool,

    /// Fmaps of the output; defaults to `num_fmaps`.
    #[config(default = "None")]
    pub num_fmaps_out: Option<usize>,

    /// Number of independent up paths.
    #[config(default = 1)]
    pub num_heads: usize,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,

    /// Optional normalization.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// Voxel size of the input; aligned with the trailing dims.
    #[config(default = "vec![1]")]
    pub voxel_size: Vec<usize>,
}

/// A resolved [`UNetConfig`].
#[derive(Debug, Clone)]
pub struct UNetPlan {
    /// Left conv passes, top first.
    pub left: Vec<ConvPassConfig>,

    /// Geometry after each left pass.
    pub left_geometry: Vec<Geometry>,

    /// Upsampling into each level but the bottom.
    pub up: Vec<UpsampleConfig>,

    /// Right conv passes of each level but the bottom.
    pub right: Vec<ConvPassConfig>,

    /// Geometry after each right pass.
    pub right_geometry: Vec<Geometry>,
}

impl UNetPlan {
    /// Geometry of every head's output.
    pub fn output(&self) -> &Geometry {
        match self.right_geometry.first() {
            Some(geometry) => geometry,
            None => &self.left_geometry[0],
        }
    }
}

impl UNetConfig {
    /// The number of spatial dims.
    pub fn spatial_dims(&self) -> usize {
        self.input_shape.len()
    }

    /// The number of levels.
    pub fn num_levels(&self) -> usize {
        self.downsample_factors.len() + 1
    }

    /// Fmaps of every level.
    pub fn level_fmaps(&self) -> Vec<usize> {
        let inc = broadcast_dims(&self.fmap_inc_factors, self.num_levels() - 1);
        (0..self.num_levels())
            .map(|level| self.num_fmaps * inc[..level].iter().product::<usize>())
            .collect()
    }

    fn default_kernels(&self) -> Vec<Vec<usize>> {
        vec![vec![3; self.spatial_dims()]; 2]
    }

    fn kernels(
        &self,
        kernels: &Option<Vec<Vec<Vec<usize>>>>,
        count: usize,
    ) -> Result<Vec<Vec<Vec<usize>>>, String> {
        match kernels {
            Some(kernels) if kernels.len() == count => Ok(kernels.clone()),
            Some(kernels) => Err(format!(
                "expected kernel sizes for {count} levels, got {}",
                kernels.len()
            )),
            None => Ok(vec![self.default_kernels(); count]),
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        let n = self.spatial_dims();
        if !(1..=4).contains(&n) {
            return Err(format!(
                "a unet supports 1 to 4 spatial dims, got {:?}",
                self.input_shape
            ));
        }
        if self.num_heads == 0 {
            return Err("a unet needs at least one head".to_string());
        }
        if self
            .downsample_factors
            .iter()
            .any(|factors| factors.len() != n)
        {
            return Err(format!(
                "downsample factors {:?} must have {n} dims",
                self.downsample_factors
            ));
        }
        let levels = self.num_levels();
        if levels > 1 && ![1, levels - 1].contains(&self.fmap_inc_factors.len()) {
            return Err(format!(
                "expected 1 or {} fmap increase factors, got {:?}",
                levels - 1,
                self.fmap_inc_factors
            ));
        }
        if !self.constant_upsample && n == 4 && levels > 1 {
            return Err("transposed upsampling supports 1 to 3 spatial dims".to_string());
        }
        Ok(())
    }

    /// Resolve every level against the input geometry.
    pub fn plan(&self) -> Result<UNetPlan, String> {
        self.try_validate()?;
        let levels = self.num_levels();
        let fmaps = self.level_fmaps();
        let kernel_size_down = self.kernels(&self.kernel_size_down, levels)?;
        let kernel_size_up = self.kernels(&self.kernel_size_up, levels - 1)?;

        let conv_pass = |in_channels: usize, out_channels: usize, kernels: &[Vec<usize>]| {
            ConvPassConfig::new(in_channels, out_channels, kernels.to_vec())
                .with_padding(self.padding)
                .with_norm(self.norm.clone())
                .with_act(Some(self.act.clone()))
        };

        let mut left = Vec::with_capacity(levels);
        let mut left_geometry = Vec::with_capacity(levels);
        let mut geometry = Geometry::try_new(self.input_shape.clone(), &self.voxel_size)?;
        for level in 0..levels {
            let in_channels = if level == 0 {
                self.in_channels
            } else {
                fmaps[level - 1]
            };
            let pass = conv_pass(in_channels, fmaps[level], &kernel_size_down[level]);
            pass.try_validate()?;
            let output = pass.try_output_geometry(&geometry)?;
            tracing::debug!(level, shape = ?output.shape, fov = ?output.fov, "planned unet left pass");

            if level + 1 < levels {
                geometry = output.try_downsample(&self.downsample_factors[level])?;
            }
            left.push(pass);
            left_geometry.push(output);
        }

        let mode = if self.constant_upsample {
            UpsampleMode::Constant
        } else {
            UpsampleMode::Transposed
        };
        let num_fmaps_out = self.num_fmaps_out.unwrap_or(self.num_fmaps);

        let mut up = vec![];
        let mut right = vec![];
        let mut right_geometry = vec![];
        let mut geometry = left_geometry[levels - 1].clone();
        for level in (0..levels - 1).rev() {
            let upsample = UpsampleConfig::new(
                fmaps[level + 1],
                fmaps[level],
                self.downsample_factors[level].clone(),
            )
            .with_mode(mode);
            upsample.try_validate()?;
            let upsampled = upsample.output_geometry(&geometry);
            left_geometry[level].try_crop(&upsampled.shape)?;

            let out_channels = if level == 0 {
                num_fmaps_out
            } else {
                fmaps[level]
            };
            let pass = conv_pass(2 * fmaps[level], out_channels, &kernel_size_up[level]);
            pass.try_validate()?;
            geometry = pass.try_output_geometry(&upsampled)?;
            tracing::debug!(level, shape = ?geometry.shape, fov = ?geometry.fov, "planned unet right pass");

            up.push(upsample);
            right.push(pass);
            right_geometry.push(geometry.clone());
        }
        up.reverse();
        right.reverse();
        right_geometry.reverse();

        let plan = UNetPlan {
            left,
            left_geometry,
            up,
            right,
            right_geometry,
        };
        let output = plan.output();
        tracing::info!(
            shape = ?output.shape,
            fov = ?output.fov,
            voxel_size = ?output.voxel_size,
            "planned unet"
        );
        Ok(plan)
    }

    /// Geometry of the outputs.
    pub fn output_geometry(&self) -> Result<Geometry, String> {
        Ok(self.plan()?.output().clone())
    }

    /// Initialize a [`UNet`].
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<UNet<B>, String> {
        let plan = self.plan()?;
        Ok(UNet {
            left: plan.left.iter().map(|pass| pass.init(device)).collect(),
            down: self
                .downsample_factors
                .iter()
                .map(|factors| MaxPoolNdConfig::new(factors.clone()).init())
                .collect(),
            heads: (0..self.num_heads)
                .map(|_| UNetHead {
                    up: plan.up.iter().map(|up| up.init(device)).collect(),
                    right: plan.right.iter().map(|pass| pass.init(device)).collect(),
                })
                .collect(),
        })
    }

    /// Initialize a [`UNet`].
    ///
    /// # Panics
    ///
    /// If the config cannot be planned.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> UNet<B> {
        match self.try_init(device) {
            Ok(model) => model,
            Err(err) => panic!("{err}"),
        }
    }
}

/// One up path of a [`UNet`].
#[derive(Module, Debug)]
pub struct UNetHead<B: Backend> {
    /// Upsampling into each level but the bottom, top first.
    pub up: Vec<Upsample<B>>,

    /// Right conv passes, top first.
    pub right: Vec<ConvPass<B>>,
}

/// `U-Net` with one or more heads.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    /// Left conv passes, top first.
    pub left: Vec<ConvPass<B>>,

    /// Downsampling between levels.
    pub down: Vec<MaxPoolNd>,

    /// Up paths.
    pub heads: Vec<UNetHead<B>>,
}

impl<B: Backend> UNet<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, spatial...]``.
    ///
    /// # Returns
    ///
    /// One ``[batch, num_fmaps_out, out_spatial...]`` tensor per head.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Vec<Tensor<B, D>> {
        let mut lefts = Vec::with_capacity(self.left.len());
        let mut x = input;
        for (level, pass) in self.left.iter().enumerate() {
            let f = pass.forward(x);
            x = match self.down.get(level) {
                Some(down) => down.forward(f.clone()),
                None => f.clone(),
            };
            lefts.push(f);
        }

        self.heads
            .iter()
            .map(|head| {
                (0..head.up.len()).rev().fold(x.clone(), |g, level| {
                    let up = head.up[level].forward(g);
                    head.right[level].forward(crop_and_merge(lefts[level].clone(), up))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_level_fmaps() {
        let config = UNetConfig::new(1, 12, vec![5], vec![vec![2, 2, 2]; 3], vec![64, 64, 64]);
        assert_eq!(config.num_levels(), 4);
        assert_eq!(config.level_fmaps(), vec![12, 60, 300, 1500]);

        let config = UNetConfig::new(1, 4, vec![2, 3], vec![vec![2]; 2], vec![64]);
        assert_eq!(config.level_fmaps(), vec![4, 8, 24]);
    }

    #[test]
    fn test_plan_valid_2d() {
        let config = UNetConfig::new(1, 4, vec![2], vec![vec![2, 2]], vec![44, 44]);
        let plan = config.plan().unwrap();

        assert_eq!(plan.left_geometry[0].shape, vec![40, 40]);
        assert_eq!(plan.left_geometry[1].shape, vec![16, 16]);
        assert_eq!(plan.left_geometry[1].fov, vec![14, 14]);
        assert_eq!(plan.left_geometry[1].voxel_size, vec![2, 2]);

        let output = plan.output();
        assert_eq!(output.shape, vec![28, 28]);
        assert_eq!(output.fov, vec![18, 18]);
        assert_eq!(output.voxel_size, vec![1, 1]);
        assert_eq!(config.output_geometry(), Ok(output.clone()));
    }

    #[test]
    fn test_plan_errors() {
        // 42 - 4 = 38 is not divisible by 4.
        let config = UNetConfig::new(1, 4, vec![2], vec![vec![4, 4]], vec![42, 42]);
        assert!(config.plan().unwrap_err().contains("cannot downsample"));

        let config = UNetConfig::new(1, 4, vec![2], vec![vec![2, 2, 2, 2]], vec![8, 8, 8, 8]);
        assert!(config.plan().is_err());

        let config = UNetConfig::new(1, 4, vec![2], vec![vec![2, 2]], vec![44, 44])
            .with_kernel_size_down(Some(vec![vec![vec![3, 3]]]));
        assert!(config.plan().is_err());
    }

    #[test]
    fn test_plan_geometry_errors() {
        let config = UNetConfig::new(1, 4, vec![2], vec![vec![2, 2]], vec![44, 44])
            .with_voxel_size(vec![1, 1, 1]);
        assert!(config.plan().unwrap_err().contains("more dims than shape"));

        let config = UNetConfig::new(1, 4, vec![2], vec![vec![2, 2]], vec![44, 0]);
        assert!(config.plan().unwrap_err().contains("must be positive"));
    }

    #[test]
    fn test_forward_valid_2d() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = UNetConfig::new(2, 4, vec![2], vec![vec![2, 2]], vec![44, 44])
            .with_num_fmaps_out(Some(3));
        let unet: UNet<B> = config.init(&device);

        let input: Tensor<B, 4> = Tensor::random([1, 2, 44, 44], Distribution::Default, &device);
        let outputs = unet.forward(input);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].dims(), [1, 3, 28, 28]);
    }

    #[test]
    fn test_forward_constant_3d_two_heads() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = UNetConfig::new(1, 2, vec![2], vec![vec![1, 2, 2], vec![2, 2, 2]], vec![8, 8, 8])
            .with_padding(PaddingMode::Same)
            .with_constant_upsample(true)
            .with_num_heads(2)
            .with_norm(Some(NormalizationConfig::batch(1e-5)));
        assert_eq!(config.output_geometry().unwrap().shape, vec![8, 8, 8]);

        let unet: UNet<B> = config.init(&device);
        assert_eq!(unet.heads.len(), 2);

        let input: Tensor<B, 5> = Tensor::random([2, 1, 8, 8, 8], Distribution::Default, &device);
        let outputs = unet.forward(input);
        assert_eq!(outputs.len(), 2);
        for output in outputs {
            assert_eq!(output.dims(), [2, 2, 8, 8, 8]);
        }
    }

    #[test]
    fn test_forward_constant_4d() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = UNetConfig::new(1, 2, vec![2], vec![vec![1, 2, 2, 2]], vec![2, 4, 4, 4])
            .with_padding(PaddingMode::Same)
            .with_constant_upsample(true)
            .with_kernel_size_down(Some(vec![vec![vec![1, 3, 3, 3]]; 2]))
            .with_kernel_size_up(Some(vec![vec![vec![1, 3, 3, 3]]]));
        let unet: UNet<B> = config.init(&device);

        let input: Tensor<B, 6> = Tensor::random([1, 1, 2, 4, 4, 4], Distribution::Default, &device);
        assert_eq!(unet.forward(input)[0].dims(), [1, 2, 2, 4, 4, 4]);
    }
}
