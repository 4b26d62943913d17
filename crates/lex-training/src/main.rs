//! CLI entry point for the training pipeline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lex_training::{
    CsvDatasetLoader, Experiment, ExperimentService, JsonFileStore, ModelFamily, Pipeline,
    TrainingConfig, TrainingStage,
};
use tracing::{debug, info};

/// CLI-compatible model family enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliModelFamily {
    /// Feed-forward neural network trained for a fixed number of epochs
    Neural,
    /// One-vs-rest logistic regression
    Classifier,
    /// Ordinary least squares regression
    Regressor,
}

impl From<CliModelFamily> for ModelFamily {
    fn from(cli: CliModelFamily) -> Self {
        match cli {
            CliModelFamily::Neural => ModelFamily::Neural,
            CliModelFamily::Classifier => ModelFamily::Classifier,
            CliModelFamily::Regressor => ModelFamily::Regressor,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author = "Lex Machina Team",
    version,
    about = "Tabular model training and evaluation",
    long_about = "Trains a model on a CSV dataset and writes the experiment record as JSON.\n\n\
                  EXAMPLES:\n  \
                  # Classify with the linear classifier\n  \
                  lex-training --data-dir data/ --dataset titanic --target Survived \\\n    \
                  --predictors Age,Fare,Sex --family classifier\n\n  \
                  # Neural regression for 50 epochs, JSON to stdout\n  \
                  lex-training --data-dir data/ --dataset housing --target price \\\n    \
                  --predictors rooms,area --epochs 50 --json\n\n  \
                  # Start from a saved configuration\n  \
                  lex-training --data-dir data/ --config run.json"
)]
struct Args {
    /// Directory containing `<dataset>.csv` files
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Dataset identifier (file name without `.csv`)
    #[arg(long)]
    dataset: Option<String>,

    /// Target column to predict
    #[arg(short, long)]
    target: Option<String>,

    /// Comma-separated predictor columns
    #[arg(short, long, value_delimiter = ',')]
    predictors: Vec<String>,

    /// Model family
    #[arg(short, long, value_enum)]
    family: Option<CliModelFamily>,

    /// Number of training epochs (neural family only)
    #[arg(long)]
    epochs: Option<u32>,

    /// Learning rate (neural family only)
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Fraction of rows held out for validation (0.0 - 1.0, exclusive)
    #[arg(long)]
    validation_split: Option<f64>,

    /// Number of shuffles per feature for permutation importance
    #[arg(long)]
    importance_repeats: Option<u32>,

    /// Random seed for splitting, initialization and importance
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory for experiment records
    #[arg(short, long, default_value = "./experiments")]
    output: PathBuf,

    /// JSON file with a training configuration
    ///
    /// Values given on the command line override the file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output the experiment JSON to stdout instead of a human-readable summary
    ///
    /// Disables all progress logs.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries
/// the experiment JSON.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Merge the optional config file with command-line overrides.
fn build_config(args: &Args) -> Result<TrainingConfig> {
    let base = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => TrainingConfig::default(),
    };

    let config = TrainingConfig::builder()
        .dataset_id(args.dataset.clone().unwrap_or(base.dataset_id))
        .target_column(args.target.clone().unwrap_or(base.target_column))
        .predictor_columns(if args.predictors.is_empty() {
            base.predictor_columns
        } else {
            args.predictors.clone()
        })
        .model_family(args.family.map_or(base.model_family, ModelFamily::from))
        .epochs(args.epochs.unwrap_or(base.epochs))
        .learning_rate(args.learning_rate.unwrap_or(base.learning_rate))
        .validation_split(args.validation_split.unwrap_or(base.validation_split))
        .importance_repeats(args.importance_repeats.unwrap_or(base.importance_repeats))
        .random_seed(args.seed.unwrap_or(base.random_seed))
        .build()?;

    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    let config = build_config(&args)?;
    debug!(?config, "Resolved configuration");

    let pipeline = Pipeline::builder()
        .on_progress(|update| {
            if update.stage == TrainingStage::Training && update.epoch.is_some() {
                debug!(progress = update.progress, "{}", update.message);
            } else if !update.stage.is_terminal() {
                info!(
                    stage = update.stage.as_str(),
                    "[{:>3.0}%] {}",
                    update.progress * 100.0,
                    update.message
                );
            }
        })
        .build();

    let service = ExperimentService::with_pipeline(
        CsvDatasetLoader::new(&args.data_dir),
        JsonFileStore::new(&args.output),
        pipeline,
    );

    let experiment = service.train(&config)?;
    let record_path = service.store().record_path(&experiment.id);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&experiment)?);
    } else {
        print_summary(&experiment);
        println!("  Record: {}", record_path.display());
    }

    Ok(())
}

/// Print a human-readable summary.
///
/// Note: This function uses `println!` intentionally for user-facing CLI output.
fn print_summary(experiment: &Experiment) {
    println!("\n{}", "=".repeat(60));
    println!("{}", experiment.name);
    println!("{}", "=".repeat(60));
    println!("  Id: {}", experiment.id);
    println!("  Dataset: {}", experiment.dataset_id);
    println!("  Model family: {}", experiment.config.model_family);
    if let Some(problem_type) = experiment.problem_type {
        println!("  Problem type: {problem_type}");
    }
    if let Some(seconds) = experiment.total_duration_seconds {
        println!("  Duration: {seconds:.2}s");
    }

    if let Some(metrics) = experiment.metrics.evaluated() {
        println!("\nMETRICS");
        println!("{}", "-".repeat(40));
        let rows = [
            ("accuracy", metrics.accuracy),
            ("precision", metrics.precision),
            ("recall", metrics.recall),
            ("f1_score", metrics.f1_score),
            ("precision_train", metrics.precision_train),
            ("mse", metrics.mse),
            ("mse_train", metrics.mse_train),
            ("r2_score", metrics.r2_score),
            ("final_loss", metrics.final_loss),
        ];
        for (name, value) in rows {
            if let Some(value) = value {
                println!("  {name:<18} {value:.4}");
            }
        }
    }

    if let Some(roc) = &experiment.roc_curve {
        println!("  {:<18} {:.4}", "roc_auc", roc.auc);
    }

    if let Some(importances) = &experiment.feature_importance {
        println!("\nFEATURE IMPORTANCE");
        println!("{}", "-".repeat(40));
        for item in importances.iter().take(10) {
            println!(
                "  {:<24} {:>8.4} (+/- {:.4})",
                item.feature, item.importance, item.importance_std
            );
        }
    }
    println!();
}
