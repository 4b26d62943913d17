//! Common types used throughout the lex-training crate.
//!
//! This module defines the experiment record and the evaluation artifacts
//! stored in it.
//!
//! # Overview
//!
//! - [`Experiment`]: Complete record produced by [`Pipeline::run()`](crate::Pipeline::run)
//! - [`Metrics`]: Evaluation metrics (classification or regression)
//! - [`EpochRecord`]: Per-epoch losses of the neural family
//! - [`ConfusionMatrix`], [`RocCurve`]: Classification artifacts
//! - [`PredictionPair`]: Actual vs predicted values for regression
//! - [`FeatureImportance`]: Permutation importance of one predictor
//!
//! # Example
//!
//! ```ignore
//! let experiment = pipeline.run(&df, &config)?;
//!
//! if let Some(metrics) = experiment.metrics.evaluated() {
//!     println!("Accuracy: {:?}", metrics.accuracy);
//! }
//! for epoch in &experiment.epochs {
//!     println!("{}: {:.4}", epoch.epoch, epoch.validation_loss);
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ProblemType, TrainingConfig};

/// Losses and precisions recorded after one epoch of the neural family.
///
/// Records are appended in order and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct EpochRecord {
    /// 1-based epoch index.
    pub epoch: u32,

    /// Loss on the training partition, evaluated without dropout.
    pub train_loss: f64,

    /// Loss on the validation partition.
    pub validation_loss: f64,

    /// Weighted precision on the training partition (classification only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_precision: Option<f64>,

    /// Weighted precision on the validation partition (classification only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_precision: Option<f64>,
}

impl EpochRecord {
    /// Create a record for one epoch.
    #[must_use]
    pub fn new(epoch: u32, train_loss: f64, validation_loss: f64) -> Self {
        Self {
            epoch,
            train_loss,
            validation_loss,
            train_precision: None,
            validation_precision: None,
        }
    }

    /// Attach weighted precisions to the record.
    #[must_use]
    pub fn with_precision(mut self, train: f64, validation: f64) -> Self {
        self.train_precision = Some(train);
        self.validation_precision = Some(validation);
        self
    }
}

/// Metrics from model evaluation.
///
/// Only the fields relevant to the detected problem type are populated;
/// absent fields are omitted when serialized.
///
/// # Classification Metrics
///
/// - `accuracy`, `precision`, `recall`, `f1_score` on the validation partition
///   (precision, recall and F1 are support-weighted)
/// - `precision_train`, `precision_validation`
///
/// # Regression Metrics
///
/// - `mse` and `mse_validation` on the validation partition, `mse_train`
/// - `r2_score` on the validation partition
///
/// `final_loss` is the last epoch's validation loss for the neural family and
/// the validation MSE for the one-shot regressor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Metrics {
    // Classification metrics
    /// Fraction of correct predictions. Range: [0.0, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    /// Weighted precision. Range: [0.0, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,

    /// Weighted recall. Range: [0.0, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,

    /// Weighted F1 score. Range: [0.0, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f1_score: Option<f64>,

    /// Weighted precision on the training partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision_train: Option<f64>,

    /// Weighted precision on the validation partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision_validation: Option<f64>,

    // Regression metrics
    /// Mean squared error on the validation partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,

    /// Mean squared error on the training partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse_train: Option<f64>,

    /// Mean squared error on the validation partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse_validation: Option<f64>,

    /// Coefficient of determination. Range: (-∞, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2_score: Option<f64>,

    // Common
    /// Final validation loss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_loss: Option<f64>,
}

/// Confusion matrix over the labels seen in the validation partition.
///
/// `matrix[i][j]` counts rows whose true label is `labels[i]` and whose
/// predicted label is `labels[j]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ConfusionMatrix {
    /// Original class labels, in encoded order.
    pub labels: Vec<String>,
    /// Row-major counts.
    pub matrix: Vec<Vec<u64>>,
}

/// ROC curve of a binary classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RocCurve {
    /// False positive rates, ascending, starting at 0.0.
    pub fpr: Vec<f64>,
    /// True positive rates matching `fpr`.
    pub tpr: Vec<f64>,
    /// Area under the curve.
    pub auc: f64,
}

/// Actual and predicted value for one validation row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPair {
    pub actual: f64,
    pub predicted: f64,
}

/// Permutation importance of one predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FeatureImportance {
    /// Encoded feature name (one-hot columns are named `<column>_<category>`).
    pub feature: String,

    /// Mean score drop across repeats.
    pub importance: f64,

    /// Standard deviation of the score drop across repeats.
    pub importance_std: f64,
}

impl FeatureImportance {
    #[must_use]
    pub fn new(feature: impl Into<String>, importance: f64, importance_std: f64) -> Self {
        Self {
            feature: feature.into(),
            importance,
            importance_std,
        }
    }
}

/// Final state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    Completed,
    Error,
}

/// Metrics payload of an experiment.
///
/// Failed experiments store the error description in place of metrics, which
/// serializes as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExperimentMetrics {
    /// The run failed with this description.
    Failed { error: String },
    /// The run completed with these metrics.
    Evaluated(Metrics),
}

impl ExperimentMetrics {
    /// Returns the metrics of a completed run.
    #[must_use]
    pub fn evaluated(&self) -> Option<&Metrics> {
        match self {
            ExperimentMetrics::Evaluated(metrics) => Some(metrics),
            ExperimentMetrics::Failed { .. } => None,
        }
    }

    /// Returns the error description of a failed run.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            ExperimentMetrics::Failed { error } => Some(error),
            ExperimentMetrics::Evaluated(_) => None,
        }
    }
}

/// Record of a single training run.
///
/// Built by the assembler and never modified afterwards. Completed records
/// carry every artifact relevant to the detected problem type; error records
/// carry the configuration, the problem type if it was resolved, and the error
/// description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Experiment {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name, derived from the creation time.
    pub name: String,

    /// Identifier of the dataset the run was trained on.
    pub dataset_id: String,

    /// Snapshot of the configuration.
    pub config: TrainingConfig,

    /// Detected problem type, if resolution finished.
    pub problem_type: Option<ProblemType>,

    /// Completed or error.
    pub state: ExperimentState,

    /// Metrics, or the error description for failed runs.
    pub metrics: ExperimentMetrics,

    /// Per-epoch history. Empty for one-shot families and failed runs.
    #[serde(default)]
    pub epochs: Vec<EpochRecord>,

    /// Wall-clock duration of each epoch in seconds.
    #[serde(default)]
    pub epoch_durations: Vec<f64>,

    /// Original class labels in encoded order (classification only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_labels: Option<Vec<String>>,

    /// Confusion matrix (classification only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confusion_matrix: Option<ConfusionMatrix>,

    /// ROC curve (binary classification only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roc_curve: Option<RocCurve>,

    /// `actual - predicted` for each validation row (regression only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residuals: Option<Vec<f64>>,

    /// Actual vs predicted pairs for each validation row (regression only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<PredictionPair>>,

    /// Permutation importance sorted descending, or `None` if it failed.
    pub feature_importance: Option<Vec<FeatureImportance>>,

    /// Seconds from pipeline start to the end of metric computation.
    pub total_duration_seconds: Option<f64>,

    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    /// Returns `true` if the run completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == ExperimentState::Completed
    }
}
