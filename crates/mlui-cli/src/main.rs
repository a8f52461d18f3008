//! mlui - supervised learning workflow manager CLI
//!
//! The `mlui` command drives one session per invocation over a JSON dataset
//! (`{"columns": [{"name": "...", "values": [...]}, ...]}`).
//!
//! ## Commands
//!
//! - `describe`: Print per-column statistics of a dataset
//! - `train`: Define, compile and train a model, then evaluate and export it
//! - `evaluate`: Evaluate an exported model on a dataset

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{info, warn, Level};

use mlui_core::{
    evaluate, init_tracing, load_artifact, CompileConfig, Dataset, DenseBackend, EarlyStopping,
    ExportFormat, LayerSpec, LogFormat, LossKind, MetricKind, MetricMap, ModelSpecBuilder,
    OptimizerConfig, Partition, RunStatus, Session, SessionConfig, SessionSpan, TrainingConfig,
    TrainingEvent,
};
use mlui_core::config::ENV_TRAINING_TIMEOUT_SECS;

#[derive(Parser)]
#[command(name = "mlui")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Supervised learning workflow manager", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print count, mean, std, min and max of every column
    Describe {
        /// Dataset file (JSON)
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Train a sequential model on a dataset
    Train(TrainArgs),

    /// Evaluate an exported model on a dataset
    Evaluate {
        /// Exported model artifact
        #[arg(short, long)]
        model: PathBuf,

        /// Artifact format (json or bin)
        #[arg(long, default_value = "json")]
        format: String,

        /// Dataset file (JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Feature columns, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,

        /// Target columns, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        targets: Vec<String>,
    },
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset file (JSON)
    #[arg(short, long)]
    data: PathBuf,

    /// Feature columns, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    features: Vec<String>,

    /// Target columns, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    targets: Vec<String>,

    /// Layer, repeatable: dense:UNITS[:ACTIVATION], dropout:RATE, batchnorm[:MOMENTUM[:EPSILON]]
    #[arg(short, long = "layer", required = true)]
    layers: Vec<String>,

    /// Model name
    #[arg(long, default_value = "model")]
    name: String,

    /// Optimizer (sgd, rmsprop or adam)
    #[arg(long, default_value = "adam")]
    optimizer: String,

    #[arg(long, default_value_t = 0.001)]
    learning_rate: f64,

    /// Loss (mse, mae or binary_crossentropy)
    #[arg(long, default_value = "mse")]
    loss: String,

    /// Extra metric, repeatable (mse, mae, rmse, accuracy)
    #[arg(long = "metric")]
    metrics: Vec<String>,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Fraction of trailing rows held out for validation
    #[arg(long, default_value_t = 0.0)]
    validation_split: f64,

    /// Stop after this many epochs without improvement of `--monitor`
    #[arg(long)]
    patience: Option<usize>,

    /// Metric watched by early stopping
    #[arg(long, default_value = "loss")]
    monitor: String,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Wall-clock limit for the run
    #[arg(long, env = ENV_TRAINING_TIMEOUT_SECS)]
    timeout_secs: Option<u64>,

    /// Write the trained model here
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Export format (json or bin)
    #[arg(long, default_value = "json")]
    format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, level);

    match cli.command {
        Commands::Describe { data } => cmd_describe(&data),
        Commands::Train(args) => cmd_train(args).await.map(|_| ()),
        Commands::Evaluate {
            model,
            format,
            data,
            features,
            targets,
        } => cmd_evaluate(&model, &format, &data, features, targets).map(|_| ()),
    }
}

fn read_dataset(path: &Path) -> Result<Dataset> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let dataset: Dataset = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a dataset document", path.display()))?;
    dataset.validate()?;
    Ok(dataset)
}

fn print_metrics(metrics: &MetricMap) {
    for (name, value) in metrics {
        println!("  {:<16} {:.6}", name, value);
    }
}

/// Print column statistics
fn cmd_describe(path: &Path) -> Result<()> {
    let dataset = read_dataset(path)?;
    println!("{} rows, {} columns", dataset.n_rows(), dataset.n_columns());
    println!(
        "{:<16} {:>8} {:>12} {:>12} {:>12} {:>12}",
        "column", "count", "mean", "std", "min", "max"
    );
    for stats in dataset.describe() {
        println!(
            "{:<16} {:>8} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
            stats.name, stats.count, stats.mean, stats.std, stats.min, stats.max
        );
    }
    Ok(())
}

fn model_builder(args: &TrainArgs) -> Result<ModelSpecBuilder> {
    let mut builder = ModelSpecBuilder::new(&args.name).input(args.features.len());
    for raw in &args.layers {
        let layer: LayerSpec = raw
            .parse()
            .with_context(|| format!("Invalid --layer `{raw}`"))?;
        builder = builder.layer(layer);
    }
    Ok(builder)
}

fn compile_config(args: &TrainArgs) -> Result<CompileConfig> {
    let optimizer = OptimizerConfig::named(&args.optimizer, args.learning_rate)?;
    let loss: LossKind = args.loss.parse()?;
    let mut config = CompileConfig::new(optimizer, loss);
    for raw in &args.metrics {
        let metric: MetricKind = raw.parse()?;
        config = config.with_metric(metric);
    }
    Ok(config)
}

fn training_config(args: &TrainArgs) -> TrainingConfig {
    let mut config = TrainingConfig::default()
        .epochs(args.epochs)
        .batch_size(args.batch_size)
        .validation_split(args.validation_split)
        .seed(args.seed);
    if let Some(patience) = args.patience {
        config = config.early_stopping(EarlyStopping::new(&args.monitor, patience));
    }
    if let Some(secs) = args.timeout_secs {
        config = config.timeout(Duration::from_secs(secs));
    }
    config
}

fn print_epoch(epoch: usize, total_epochs: usize, metrics: &MetricMap) {
    let rendered: Vec<String> = metrics
        .iter()
        .map(|(name, value)| format!("{name}={value:.6}"))
        .collect();
    println!("epoch {epoch}/{total_epochs}  {}", rendered.join("  "));
}

/// Train a model end to end. Returns the final run status.
async fn cmd_train(args: TrainArgs) -> Result<RunStatus> {
    let dataset = read_dataset(&args.data)?;
    let config = SessionConfig::from_env()?;
    let mut session = Session::new(DenseBackend::with_seed(args.seed), config);
    let _span = SessionSpan::enter(session.id());
    info!(session_id = %session.id(), "Session created");

    session.load_dataset(dataset)?;
    session.set_partition(args.features.clone(), args.targets.clone())?;
    session.define_model(model_builder(&args)?.build()?)?;
    if let Some(summary) = session.model_summary() {
        println!("Model: {} ({} parameters)", summary.name, summary.total_params);
        for layer in &summary.layers {
            println!(
                "  {:>2}  {:<32} -> {:>5}  {:>8} params",
                layer.index, layer.description, layer.output_width, layer.params
            );
        }
    }
    session.compile_model(compile_config(&args)?)?;

    let handle = session.start_training(training_config(&args))?;
    let mut events = handle.subscribe();
    let status = loop {
        tokio::select! {
            status = handle.wait() => break status,
            event = events.recv() => match event {
                Ok(TrainingEvent::Epoch { epoch, total_epochs, metrics, .. }) => {
                    print_epoch(epoch, total_epochs, &metrics);
                }
                Ok(TrainingEvent::Finished { .. }) | Err(RecvError::Closed) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress output fell behind");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if session.cancel_training()? {
                    println!("Cancelling after the current epoch...");
                }
            }
        }
    };
    loop {
        match events.try_recv() {
            Ok(TrainingEvent::Epoch {
                epoch,
                total_epochs,
                metrics,
                ..
            }) => print_epoch(epoch, total_epochs, &metrics),
            Ok(TrainingEvent::Finished { .. }) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let record = handle.record();
    println!(
        "Training {} after {} of {} epochs{}",
        status,
        record.epochs_completed(),
        record.total_epochs,
        if record.stopped_early {
            " (stopped early)"
        } else {
            ""
        }
    );
    if status != RunStatus::Completed {
        session.discard_training_run()?;
        match record.diagnostic {
            Some(diagnostic) => bail!("Training {status}: {diagnostic}"),
            None => bail!("Training {status}"),
        }
    }

    session.accept_trained_model()?;
    let report = session.evaluate()?;
    println!("Evaluation on {} rows:", report.rows);
    print_metrics(&report.metrics);

    if let Some(path) = &args.export {
        let receipt = session.export(path, &args.format)?;
        println!(
            "Exported {} ({} bytes, sha256 {})",
            receipt.path.display(),
            receipt.bytes,
            receipt.digest
        );
    }
    Ok(status)
}

/// Evaluate an exported model
fn cmd_evaluate(
    model: &Path,
    format: &str,
    data: &Path,
    features: Vec<String>,
    targets: Vec<String>,
) -> Result<MetricMap> {
    let format: ExportFormat = format.parse()?;
    let backend = DenseBackend::default();
    let trained = load_artifact(&backend, model, format)
        .with_context(|| format!("Failed to load model {}", model.display()))?;
    let dataset = read_dataset(data)?;
    let holdout = Partition::new(features, targets)?.select(&dataset)?;

    let report = evaluate(&backend, &trained, &holdout)?;
    println!("Evaluation on {} rows:", report.rows);
    print_metrics(&report.metrics);
    Ok(report.metrics)
}
