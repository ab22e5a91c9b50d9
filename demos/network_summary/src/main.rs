//! Build a network, log its geometry and run a forward pass on the CPU.
//!
//! ```text
//! $ network_summary resnet --shape=64,64 --resnet-size=18
//! $ network_summary unet --shape=44,44 --levels=2
//! $ network_summary efficientnet --shape=3,32,32,32 --variant=b0
//! $ RUST_LOG=debug network_summary vgg --shape=16,64,64 --print-record
//! ```

use anyhow::bail;
use burn::backend::NdArray;
use burn::module::Module;
use burn::prelude::Tensor;
use burn::tensor::{Distribution, Shape};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use voxnets::compat::activation_wrapper::ActivationConfig;
use voxnets::compat::conv_shape::PaddingMode;
use voxnets::compat::normalization_wrapper::NormalizationConfig;
use voxnets::models::efficientnet::efficientnet_model::{EfficientNet, EfficientNetConfig};
use voxnets::models::efficientnet::prefabs::EfficientNetVariant;
use voxnets::models::resnet::prefabs::ResNetSize;
use voxnets::models::resnet::resnet_model::{ResNet, ResNetConfig};
use voxnets::models::unet::{UNet, UNetConfig};
use voxnets::models::vgg::{Vgg, VggConfig};
use voxnets::utility::record::format_record_summary;

type B = NdArray<f32>;

/// Network family.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Network {
    Resnet,
    Unet,
    Vgg,
    Efficientnet,
}

/// Padding policy.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    Same,
    Valid,
}

impl From<Padding> for PaddingMode {
    fn from(padding: Padding) -> Self {
        match padding {
            Padding::Same => PaddingMode::Same,
            Padding::Valid => PaddingMode::Valid,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Network family.
    #[arg(value_enum, default_value_t = Network::Resnet)]
    network: Network,

    /// Spatial input shape; 4 dims are ``time, z, y, x``.
    #[arg(long, value_delimiter = ',', default_value = "64,64")]
    shape: Vec<usize>,

    /// Voxel size, aligned with the trailing dims of the shape.
    #[arg(long, value_delimiter = ',', default_value = "1")]
    voxel_size: Vec<usize>,

    /// Input channels.
    #[arg(long, default_value_t = 1)]
    in_channels: usize,

    /// Output classes of the classifiers.
    #[arg(long, default_value_t = 2)]
    num_classes: usize,

    /// Batch size of the forward pass.
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,

    /// `ResNet` depth: 18, 34, 50 or 101.
    #[arg(long, default_value = "18")]
    resnet_size: ResNetSize,

    /// Lift the input channels into a time axis and use 4d convs (`ResNet`).
    #[arg(long)]
    conv4d: bool,

    /// Merge time once the voxel size reaches this (`ResNet`).
    #[arg(long)]
    merge_time_voxel_size: Option<usize>,

    /// `EfficientNet` variant: b0 to b7.
    #[arg(long, default_value = "b0")]
    variant: EfficientNetVariant,

    /// Levels (`U-Net`) or stages (`VGG`).
    #[arg(long, default_value_t = 3)]
    levels: usize,

    /// Fmaps of the top level (`U-Net`, `VGG`).
    #[arg(long, default_value_t = 12)]
    num_fmaps: usize,

    /// Activation of the conv passes (`U-Net`, `VGG`), e.g. relu, leaky_relu, silu.
    #[arg(long, default_value = "relu")]
    activation: ActivationConfig,

    /// Use batch norm.
    #[arg(long)]
    batchnorm: bool,

    /// Padding (`U-Net` defaults to valid, `VGG` to same).
    #[arg(long, value_enum)]
    padding: Option<Padding>,

    /// Only plan and build; skip the forward pass.
    #[arg(long)]
    skip_forward: bool,

    /// Print the parameter shapes of the model.
    #[arg(long)]
    print_record: bool,
}

/// Rank-generic forward pass, reporting output shapes.
trait ForwardShapes {
    fn forward_shapes<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Vec<Vec<usize>>;
}

impl ForwardShapes for ResNet<B> {
    fn forward_shapes<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Vec<Vec<usize>> {
        vec![self.forward(input).dims().to_vec()]
    }
}

impl ForwardShapes for UNet<B> {
    fn forward_shapes<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Vec<Vec<usize>> {
        self.forward(input)
            .into_iter()
            .map(|output| output.dims().to_vec())
            .collect()
    }
}

impl ForwardShapes for Vgg<B> {
    fn forward_shapes<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Vec<Vec<usize>> {
        vec![self.forward(input).dims().to_vec()]
    }
}

impl ForwardShapes for EfficientNet<B> {
    fn forward_shapes<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Vec<Vec<usize>> {
        vec![self.forward(input).dims().to_vec()]
    }
}

fn random_input<const D: usize>(dims: &[usize]) -> Tensor<B, D> {
    Tensor::random(
        Shape::from(dims.to_vec()),
        Distribution::Default,
        &Default::default(),
    )
}

fn summarize<M>(
    model: M,
    args: &Args,
) -> anyhow::Result<()>
where
    M: Module<B> + ForwardShapes,
{
    tracing::info!(params = model.num_params(), "built {:?}", args.network);

    if !args.skip_forward {
        let mut dims = vec![args.batch_size, args.in_channels];
        dims.extend(&args.shape);

        let outputs = match dims.len() {
            3 => model.forward_shapes(random_input::<3>(&dims)),
            4 => model.forward_shapes(random_input::<4>(&dims)),
            5 => model.forward_shapes(random_input::<5>(&dims)),
            6 => model.forward_shapes(random_input::<6>(&dims)),
            _ => bail!("expected 1 to 4 spatial dims, got {:?}", args.shape),
        };
        for output in outputs {
            tracing::info!(input = ?dims, output = ?output, "forward");
        }
    }

    if args.print_record {
        println!("{}", format_record_summary::<B, _>(model.into_record())?);
    }
    Ok(())
}

fn norm(args: &Args) -> Option<NormalizationConfig> {
    args.batchnorm.then(|| NormalizationConfig::batch(1e-5))
}

/// Downsample by 2 in every dim but time.
fn factors(args: &Args) -> Vec<usize> {
    let n = args.shape.len();
    (0..n)
        .map(|i| if n == 4 && i == 0 { 1 } else { 2 })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = Default::default();
    tracing::debug!(?args, "arguments");

    match args.network {
        Network::Resnet => {
            let model: ResNet<B> = ResNetConfig::new(
                args.in_channels,
                args.num_classes,
                args.shape.clone(),
            )
            .with_size(Some(args.resnet_size))
            .with_voxel_size(args.voxel_size.clone())
            .with_use_batchnorm(args.batchnorm)
            .with_use_conv4d(args.conv4d)
            .with_merge_time_voxel_size(args.merge_time_voxel_size)
            .try_init(&device)
            .map_err(anyhow::Error::msg)?;
            summarize(model, &args)
        }
        Network::Unet => {
            let config = UNetConfig::new(
                args.in_channels,
                args.num_fmaps,
                vec![3],
                vec![factors(&args); args.levels.saturating_sub(1)],
                args.shape.clone(),
            )
            .with_padding(args.padding.map_or(PaddingMode::Valid, Into::into))
            .with_constant_upsample(args.shape.len() == 4)
            .with_act(args.activation.clone())
            .with_norm(norm(&args))
            .with_voxel_size(args.voxel_size.clone());
            let model: UNet<B> = config.try_init(&device).map_err(anyhow::Error::msg)?;
            summarize(model, &args)
        }
        Network::Vgg => {
            let model: Vgg<B> = VggConfig::new(
                args.in_channels,
                args.num_classes,
                vec![factors(&args); args.levels],
                args.shape.clone(),
            )
            .with_num_fmaps(args.num_fmaps)
            .with_padding(args.padding.map_or(PaddingMode::Same, Into::into))
            .with_fc_size(256)
            .with_act(args.activation.clone())
            .with_norm(norm(&args))
            .with_voxel_size(args.voxel_size.clone())
            .try_init(&device)
            .map_err(anyhow::Error::msg)?;
            summarize(model, &args)
        }
        Network::Efficientnet => {
            let model: EfficientNet<B> = EfficientNetConfig::from_variant(
                args.variant,
                args.in_channels,
                args.num_classes,
                args.shape.clone(),
            )
            .with_voxel_size(args.voxel_size.clone())
            .try_init(&device)
            .map_err(anyhow::Error::msg)?;
            summarize(model, &args)
        }
    }
}
