use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;

use mrcnn_heads::model::{describe_io, TensorSummary};
use mrcnn_heads::training::{CallbackList, Logs, ShapeLoggingCallback, TrainingCallback};
use mrcnn_heads::{MaskRcnnHeads, ModelConfig};

type BackendType = NdArray;
type DeviceType = <BackendType as Backend>::Device;

/// Backbone strides of C1..C5.
const STAGE_STRIDES: [usize; 5] = [2, 4, 8, 16, 32];

#[derive(Parser, Debug)]
#[command(author, version, about = "Mask R-CNN pyramid and head dry run on synthetic features")]
struct Args {
    /// Model config; written with defaults when missing
    #[arg(short, long, default_value = "configs/model.yaml")]
    config: PathBuf,

    #[arg(long, default_value_t = 1)]
    epochs: usize,

    /// Batches per epoch
    #[arg(long, default_value_t = 2)]
    batches: usize,

    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// ROIs per image
    #[arg(long, default_value_t = 8)]
    rois: usize,

    /// Write every output name and shape as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    /// Every count feeds a tensor dimension or a loop bound, so zero is rejected up front.
    fn validate(&self) -> Result<()> {
        ensure!(self.epochs > 0, "--epochs must be at least 1");
        ensure!(self.batches > 0, "--batches must be at least 1");
        ensure!(self.batch_size > 0, "--batch-size must be at least 1");
        ensure!(self.rois > 0, "--rois must be at least 1");
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    args.validate()?;
    let config = load_or_create_config(&args.config)?;

    log::info!("Model config:");
    log::info!("  Classes        : {}", config.num_classes);
    log::info!("  Image shape    : {:?}", config.image_shape);
    log::info!("  Pool / mask    : {} / {}", config.pool_size, config.mask_pool_size);
    log::info!("  Pyramid depth  : {}", config.pyramid_channels);

    let device = DeviceType::default();
    let heads = MaskRcnnHeads::<BackendType>::new(&device, &config);

    let summaries = dry_run(&heads, &config, &args, &device)?;

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&summaries)?)
            .with_context(|| format!("writing report {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }
    Ok(())
}

fn load_or_create_config(path: &Path) -> Result<ModelConfig> {
    if path.exists() {
        log::info!("Loading config from {}", path.display());
        return ModelConfig::from_yaml(path);
    }
    let config = ModelConfig::default();
    config.save(path)?;
    log::info!("Created default config at {}", path.display());
    Ok(config)
}

/// Drives the lifecycle hooks around forward passes. Nothing is optimized.
fn dry_run(
    heads: &MaskRcnnHeads<BackendType>,
    config: &ModelConfig,
    args: &Args,
    device: &DeviceType,
) -> Result<Vec<TensorSummary>> {
    let mut rng = rand::thread_rng();
    let stage_channels = stage_channels(config);

    let mut inputs: Vec<TensorSummary> = STAGE_STRIDES
        .iter()
        .zip(stage_channels)
        .enumerate()
        .map(|(i, (stride, channels))| {
            TensorSummary::new(
                format!("backbone_c{}", i + 1),
                stage_shape(config, args.batch_size, channels, *stride).to_vec(),
            )
        })
        .collect();
    inputs.push(TensorSummary::new("input_rois", vec![args.batch_size, args.rois, 4]));

    let mut callbacks = CallbackList::new();
    callbacks.push(ShapeLoggingCallback::new(inputs.clone()));

    let total = (args.epochs * args.batches) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("progress bar template")?,
    );

    let mut outputs = Vec::new();
    callbacks.on_train_begin(&Logs::default());
    for epoch in 0..args.epochs {
        callbacks.on_epoch_begin(epoch, &Logs::default());

        for batch in 0..args.batches {
            callbacks.on_batch_begin(batch, &Logs::batch(args.batch_size));

            let stages = synthetic_stages(config, args.batch_size, device);
            let rois = random_rois(&mut rng, args.batch_size, args.rois, device);
            let output = heads.forward(stages, rois);

            if outputs.is_empty() {
                outputs = output.summaries();
                describe_io(&inputs, &outputs);
            }

            let confidence = output
                .classifier
                .probs
                .max_dim(2)
                .mean()
                .into_scalar()
                .elem::<f32>();
            let mask_mean = output.masks.mean().into_scalar().elem::<f32>();

            let logs = Logs::batch(args.batch_size)
                .with_value("mean_confidence", confidence)
                .with_value("mean_mask", mask_mean);
            callbacks.on_batch_end(batch, &logs);

            pb.set_message(format!("epoch {} batch {}", epoch + 1, batch + 1));
            pb.inc(1);
        }

        callbacks.on_epoch_end(epoch, &Logs::default());
    }
    callbacks.on_train_end(&Logs::default());
    pb.finish_with_message("dry run completed");

    let mut summaries = inputs;
    summaries.extend(outputs);
    Ok(summaries)
}

/// C1 is taken as half of C2's depth; it is discarded by the pyramid anyway.
fn stage_channels(config: &ModelConfig) -> [usize; 5] {
    let [c2, c3, c4, c5] = config.backbone_channels;
    [(c2 / 2).max(1), c2, c3, c4, c5]
}

fn stage_shape(config: &ModelConfig, batch: usize, channels: usize, stride: usize) -> [usize; 4] {
    let [height, width, _] = config.image_shape;
    [batch, channels, height / stride, width / stride]
}

fn synthetic_stages(
    config: &ModelConfig,
    batch: usize,
    device: &DeviceType,
) -> [Tensor<BackendType, 4>; 5] {
    let channels = stage_channels(config);
    std::array::from_fn(|i| {
        Tensor::random(
            stage_shape(config, batch, channels[i], STAGE_STRIDES[i]),
            Distribution::Uniform(0.0, 1.0),
            device,
        )
    })
}

/// Well-formed normalized boxes: y1 < y2, x1 < x2, all inside [0, 1].
fn random_rois(
    rng: &mut impl Rng,
    batch: usize,
    count: usize,
    device: &DeviceType,
) -> Tensor<BackendType, 3> {
    let mut coords = Vec::with_capacity(batch * count * 4);
    for _ in 0..batch * count {
        let y1: f32 = rng.gen_range(0.0..0.9);
        let x1: f32 = rng.gen_range(0.0..0.9);
        let y2 = rng.gen_range(y1 + 0.01..=1.0);
        let x2 = rng.gen_range(x1 + 0.01..=1.0);
        coords.extend([y1, x1, y2, x2]);
    }
    Tensor::from_data(TensorData::new(coords, [batch, count, 4]), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let argv = std::iter::once("mrcnn-heads").chain(extra.iter().copied());
        Args::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert_eq!(args.rois, 8);
        assert_eq!(args.batch_size, 1);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_counts() {
        for flag in ["--rois", "--batch-size", "--batches", "--epochs"] {
            let err = parse(&[flag, "0"]).validate().unwrap_err();
            assert!(err.to_string().contains(flag), "{flag}: {err}");
        }
    }

    #[test]
    fn test_rejects_negative_counts_at_parse_time() {
        let argv = ["mrcnn-heads", "--rois", "-3"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_random_rois_are_well_formed() {
        let device = DeviceType::default();
        let rois = random_rois(&mut rand::thread_rng(), 2, 5, &device);
        assert_eq!(rois.dims(), [2, 5, 4]);

        let coords: Vec<f32> = rois.into_data().iter::<f32>().collect();
        for roi in coords.chunks(4) {
            assert!(roi.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(roi[0] < roi[2] && roi[1] < roi[3], "{roi:?}");
        }
    }
}
