//! Training CLI
//!
//! Trains the rock/paper/scissors head on top of the frozen backbone,
//! reconciles the best checkpoint, evaluates it on the test split and
//! writes the serving export. With `--run-training false` the persisted
//! model is evaluated instead.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use clap::Parser;
use colored::Colorize;
use image::{Rgb, Rgb32FImage};
use rps_core::{
    init_backend, load_toml_config, parse_bool_flag, setup_cli_logging, BackendConfig, Device,
    PathsConfig, PipelineConfig, CLASS_NAMES, WORKSPACE_DIR_ENV,
};
use rps_dataset::augmentation::revert_normalize_to_u8;
use rps_dataset::Collection;
use rps_training::{prepare_partitions, Orchestrator, RunSummary};
use tracing::info;

/// Rock/paper/scissors transfer learning
#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(author = "Warre Snaet")]
#[command(version = "0.1.0")]
#[command(about = "Train and evaluate the rock/paper/scissors classifier", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workspace root holding datasets/, models/ and pretrained/
    #[arg(long, env = WORKSPACE_DIR_ENV, value_name = "DIR")]
    workspace_dir: Option<PathBuf>,

    /// Train a new model (false: evaluate the persisted one)
    #[arg(long, env = "RUN_TRAINING", value_name = "BOOL", value_parser = parse_flag)]
    run_training: Option<bool>,

    /// Write the serving export
    #[arg(long, env = "SAVED_MODEL", value_name = "BOOL", value_parser = parse_flag)]
    saved_model: Option<bool>,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override the root seed
    #[arg(long)]
    seed: Option<u64>,

    /// Never use an accelerator
    #[arg(long)]
    cpu: bool,

    /// Write N augmented training samples as PNG and exit
    #[arg(long, value_name = "N")]
    dump_augmented: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    parse_bool_flag(value).ok_or_else(|| format!("expected true/false, got '{value}'"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    println!("{}", "Rock / Paper / Scissors - Transfer Learning".green().bold());
    println!("{}", "===========================================".green());

    let mut config = match &args.config {
        Some(path) => load_toml_config(path).context("Failed to load configuration file")?,
        None => PipelineConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;
    print_config_summary(&config);

    if let Some(count) = args.dump_augmented {
        return dump_augmented(&config, count);
    }

    let device = init_backend(&BackendConfig {
        prefer_gpu: config.device.prefer_gpu,
        accelerator_compiled: cfg!(feature = "wgpu"),
    });
    let summary = run(config, device)?;
    print_run_summary(&summary);

    Ok(())
}

fn apply_overrides(config: &mut PipelineConfig, args: &Args) {
    if let Some(dir) = &args.workspace_dir {
        config.paths = PathsConfig::new(dir);
    }
    if let Some(run_training) = args.run_training {
        config.run.run_training = run_training;
    }
    if let Some(saved_model) = args.saved_model {
        config.run.saved_model = saved_model;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.cpu {
        config.device.prefer_gpu = false;
    }
}

fn print_config_summary(config: &PipelineConfig) {
    println!();
    println!("{}", "Configuration:".cyan().bold());
    println!("  Workspace:        {}", config.paths.workspace_dir.display());
    println!("  Dataset:          {}", config.data.dataset_name);
    println!("  Model:            {}", config.model.name);
    println!("  Run training:     {}", config.run.run_training);
    println!("  Saved model:      {}", config.run.saved_model);
    println!("  Epochs:           {}", config.training.epochs);
    println!("  Batch size:       {}", config.training.batch_size);
    println!("  Learning rate:    {}", config.training.learning_rate);
    println!("  Input size:       {}", config.data.target_size);
    println!("  Validation share: {}", config.data.validation_proportion);
    println!("  Seed:             {}", config.seed);
    println!();
}

fn run(config: PipelineConfig, device: Device) -> Result<RunSummary> {
    match device {
        #[cfg(feature = "wgpu")]
        Device::Gpu(_) => {
            use burn_wgpu::{Wgpu, WgpuDevice};
            let orchestrator = Orchestrator::<Autodiff<Wgpu>>::new(config, WgpuDevice::default())?;
            Ok(orchestrator.run()?)
        }
        _ => {
            let orchestrator = Orchestrator::<Autodiff<NdArray>>::new(config, Default::default())?;
            Ok(orchestrator.run()?)
        }
    }
}

fn print_run_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run complete".green().bold());
    if let Some(best) = &summary.best_checkpoint {
        println!(
            "  Best epoch:       {} (val_accuracy {:.4})",
            best.epoch, best.val_accuracy
        );
    }
    if let Some(final_epoch) = &summary.final_epoch_test {
        println!("  Test (final):     {:.4}", final_epoch.metrics.accuracy);
    }
    println!("  Test (best):      {:.4}", summary.test.metrics.accuracy);
    println!("  Model:            {}", summary.model_path.display());
    if let Some(export_dir) = &summary.export_dir {
        println!("  Serving export:   {}", export_dir.display());
    }
}

/// Writes the first `count` training samples of epoch 0, augmented, as PNG
fn dump_augmented(config: &PipelineConfig, count: usize) -> Result<()> {
    let dataset_dir = config.paths.dataset_dir(&config.data.dataset_name);
    let collection = Collection::load(&dataset_dir, config.seed)?;
    let prepared = prepare_partitions(config, &collection)?;

    let out_dir = config.paths.workspace_dir.join("augmented");
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let labels = prepared.train.labels();
    let mut written = 0;
    for (i, index) in prepared.train.order(0).into_iter().take(count).enumerate() {
        let mut image = prepared.train.sample(index, 0)?;
        if config.data.normalize_m1_p1 {
            image = signed_to_unit(&image);
        }
        let path = out_dir.join(format!("{i:03}_{}.png", CLASS_NAMES[labels[index]]));
        revert_normalize_to_u8(&image)
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }

    info!("Wrote {} augmented samples to {}", written, out_dir.display());
    Ok(())
}

fn signed_to_unit(image: &Rgb32FImage) -> Rgb32FImage {
    let (width, height) = image.dimensions();
    Rgb32FImage::from_fn(width, height, |x, y| {
        Rgb(image.get_pixel(x, y).0.map(|v| (v + 1.0) * 0.5))
    })
}
