//! Experiment assembly.
//!
//! Turns the artifacts of a run into an immutable [`Experiment`] record, or
//! builds the error record for a failed run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{ProblemType, TrainingConfig};
use crate::error::ExperimentError;
use crate::metrics::Evaluation;
use crate::types::{EpochRecord, Experiment, ExperimentMetrics, ExperimentState, FeatureImportance};

/// Artifacts of a successful run.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub problem_type: ProblemType,
    /// Original class labels in encoded order, empty for regression.
    pub classes: Vec<String>,
    pub evaluation: Evaluation,
    pub epochs: Vec<EpochRecord>,
    pub epoch_durations: Vec<f64>,
    pub feature_importance: Option<Vec<FeatureImportance>>,
    /// Time from pipeline start to the end of metric computation.
    pub elapsed: Duration,
}

/// Builds experiment records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExperimentAssembler;

impl ExperimentAssembler {
    /// Build the record of a completed run.
    pub fn completed(&self, config: &TrainingConfig, run: CompletedRun) -> Experiment {
        let created_at = Utc::now();
        let classification = run.problem_type == ProblemType::Classification;
        let Evaluation {
            metrics,
            confusion_matrix,
            roc_curve,
            residuals,
            predictions,
        } = run.evaluation;

        Experiment {
            id: Uuid::new_v4().to_string(),
            name: completed_name(created_at),
            dataset_id: config.dataset_id.clone(),
            config: config.clone(),
            problem_type: Some(run.problem_type),
            state: ExperimentState::Completed,
            metrics: ExperimentMetrics::Evaluated(metrics),
            epochs: run.epochs,
            epoch_durations: run.epoch_durations,
            class_labels: classification.then_some(run.classes),
            confusion_matrix,
            roc_curve,
            residuals,
            predictions,
            feature_importance: run.feature_importance,
            total_duration_seconds: Some(run.elapsed.as_secs_f64()),
            created_at,
        }
    }

    /// Build the error record of a failed run.
    ///
    /// The record keeps the configuration, the problem type if it was
    /// resolved, and the error description in place of metrics.
    pub fn failed(
        &self,
        config: &TrainingConfig,
        problem_type: Option<ProblemType>,
        error: &ExperimentError,
    ) -> Experiment {
        let created_at = Utc::now();
        Experiment {
            id: Uuid::new_v4().to_string(),
            name: failed_name(created_at),
            dataset_id: config.dataset_id.clone(),
            config: config.clone(),
            problem_type,
            state: ExperimentState::Error,
            metrics: ExperimentMetrics::Failed {
                error: error.to_string(),
            },
            epochs: Vec::new(),
            epoch_durations: Vec::new(),
            class_labels: None,
            confusion_matrix: None,
            roc_curve: None,
            residuals: None,
            predictions: None,
            feature_importance: None,
            total_duration_seconds: None,
            created_at,
        }
    }
}

fn completed_name(at: DateTime<Utc>) -> String {
    format!("Experiment_{}", at.format("%Y%m%d_%H%M%S"))
}

fn failed_name(at: DateTime<Utc>) -> String {
    format!("Failed Experiment - {}", at.format("%Y-%m-%d %H:%M"))
}
