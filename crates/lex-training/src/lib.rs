//! lex-training: Training-and-evaluation pipeline for tabular experiments.
//!
//! This crate turns a tabular dataset and a [`TrainingConfig`] into an
//! [`Experiment`]: a complete record of one training run with metrics,
//! per-epoch history, diagnostic artifacts and feature importances.
//!
//! # Features
//!
//! - **Data Preparation**: Mean imputation, one-hot encoding, numeric coercion
//! - **Problem-Type Detection**: Classification vs regression from the target column
//! - **Three Model Families**: Neural network, linear classifier, linear regressor
//! - **Metrics**: Accuracy/precision/recall/F1, confusion matrix, ROC/AUC, MSE, R²
//! - **Explainability**: Permutation feature importance
//! - **Progress Reporting**: Stage and per-epoch progress callbacks
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lex_training::{
//!     CsvDatasetLoader, ExperimentService, JsonFileStore, ModelFamily, TrainingConfig,
//! };
//!
//! let config = TrainingConfig::builder()
//!     .dataset_id("titanic")
//!     .target_column("Survived")
//!     .predictor_columns(["Age", "Fare", "Sex"])
//!     .model_family(ModelFamily::Classifier)
//!     .build()?;
//!
//! let service = ExperimentService::new(
//!     CsvDatasetLoader::new("data/"),
//!     JsonFileStore::new("experiments/"),
//! );
//! let experiment = service.train(&config)?;
//! println!("{}: {:?}", experiment.name, experiment.metrics);
//! ```
//!
//! A [`Pipeline`] can also be run directly on an in-memory polars
//! `DataFrame`, without a loader or a store.
//!
//! # Architecture
//!
//! ```text
//! DatasetLoader ──► DataFrame
//!                      │
//!   DataPreparer ──► resolve_target ──► train_test_split + StandardScaler
//!                                              │
//!                      ModelTrainer (neural | classifier | regressor)
//!                                              │
//!   MetricsEngine ──► ImportanceEngine ──► ExperimentAssembler
//!                                              │
//!                                   Experiment ──► ExperimentStore
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T>`](Result) with
//! [`ExperimentError`]:
//!
//! - [`ExperimentError::Configuration`] - Invalid configuration
//! - [`ExperimentError::TypeConflict`] - Model family does not fit the target
//! - [`ExperimentError::InsufficientClasses`] - Classification target with one class
//! - [`ExperimentError::UpstreamData`] - Dataset missing, empty or unreadable
//! - [`ExperimentError::Computation`] - Numeric failure during training or metrics
//!
//! Feature importance failures never fail a run; the experiment is completed
//! with `feature_importance: None`.
//!
//! # Thread Safety
//!
//! [`Pipeline`] and [`ExperimentService`] hold no per-run state and are
//! `Send + Sync`. A run is a single blocking computation; only the
//! permutation repeats run in parallel (rayon).

mod assembler;
mod config;
pub mod data;
mod error;
pub mod importance;
pub mod metrics;
pub mod models;
mod pipeline;
mod progress;
mod service;
mod storage;
mod types;
mod utils;

// Re-export public API
//
// Configuration types
pub use config::{ModelFamily, ProblemType, TrainingConfig, TrainingConfigBuilder};
// Error types
pub use error::{ExperimentError, Result, ResultExt, UpstreamDataKind};
// Pipeline types
pub use assembler::{CompletedRun, ExperimentAssembler};
pub use pipeline::{Pipeline, PipelineBuilder, RunOutcome};
// Progress reporting types
pub use progress::{ProgressCallback, ProgressUpdate, TrainingStage};
// Collaborators
pub use service::{DatasetLoader, ExperimentService, ExperimentStore};
pub use storage::{CsvDatasetLoader, InMemoryStore, JsonFileStore};
// Result and metrics types
pub use types::{
    ConfusionMatrix, EpochRecord, Experiment, ExperimentMetrics, ExperimentState,
    FeatureImportance, Metrics, PredictionPair, RocCurve,
};

static_assertions::assert_impl_all!(TrainingConfig: Send, Sync);
static_assertions::assert_impl_all!(Experiment: Send, Sync);
static_assertions::assert_impl_all!(
    ExperimentService<CsvDatasetLoader, JsonFileStore>: Send,
    Sync
);
