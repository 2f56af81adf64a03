use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::info;
use spark::core::output::write_predictions_to_csv;
use spark::plot::plot_loss::plot_loss_over_iterations;
use spark::prelude::*;

/// Trains and queries a small conv -> relu -> pool -> fully-connected classifier
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train on a CSV of labelled images, checkpointing after every iteration
    Train(TrainArgs),

    /// Classify a CSV of images with the latest checkpoint
    Predict(PredictArgs),
}

#[derive(Debug, Args)]
struct DataArgs {
    /// Network configuration as JSON; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Header-less CSV, one image per row: label followed by W*H*D values
    #[arg(long)]
    images: PathBuf,

    /// Class names, one per line
    #[arg(long)]
    classes: PathBuf,

    /// Directory holding the parameter checkpoints
    #[arg(long, default_value = "checkpoints")]
    checkpoints: PathBuf,

    /// Rescale pixel values from [PIXEL_MIN, PIXEL_MAX] to [0, 1]
    #[arg(long, requires = "pixel_max")]
    pixel_min: Option<f64>,

    #[arg(long, requires = "pixel_min")]
    pixel_max: Option<f64>,
}

#[derive(Debug, Args)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, default_value_t = 2)]
    batch_size: usize,

    #[arg(long, default_value_t = 100)]
    iterations: usize,

    /// Write the loss curve to this SVG file
    #[arg(long)]
    plot: Option<String>,
}

#[derive(Debug, Args)]
struct PredictArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Write per-image class probabilities to this CSV file
    #[arg(long)]
    output: Option<PathBuf>,
}

fn load(args: &DataArgs) -> Result<(NetworkConfig, InMemoryDataset, FileStore)> {
    let config = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig::default(),
    };
    let pixel_range = args.pixel_min.zip(args.pixel_max);
    let data = InMemoryDataset::from_csv(&args.images, &args.classes, config.input, pixel_range)?;
    info!("loaded {} images from {}", data.len(), args.images.display());
    let store = FileStore::new(&args.checkpoints)?;
    Ok((config, data, store))
}

fn train(args: TrainArgs) -> Result<()> {
    let (config, data, store) = load(&args.data)?;
    let mut network = Network::from_source(config, &data, store)?;
    info!("{}", network.summary());

    let report = network.train(&data, args.batch_size, args.iterations)?;
    if let Some(last) = report.losses.last() {
        info!("final loss {:.6}", last);
    }
    info!("training accuracy {:.3}", network.accuracy(data.data())?);

    if let Some(path) = &args.plot {
        plot_loss_over_iterations(&report.losses, path)?;
    }
    Ok(())
}

fn predict(args: PredictArgs) -> Result<()> {
    let (config, data, store) = load(&args.data)?;
    let mut network = Network::from_source(config, &data, store)?;

    let probabilities = network.predict_proba(&data.data().images)?;
    info!("accuracy {:.3}", network.accuracy(data.data())?);

    if let Some(path) = &args.output {
        write_predictions_to_csv(&probabilities, network.classes(), path)?;
        info!("predictions written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Train(args) => train(args),
        Command::Predict(args) => predict(args),
    }
}
