//! Metrics engine.
//!
//! Computes the final [`Metrics`] and the classification or regression
//! artifacts from a [`TrainingOutcome`], then reconciles them with the last
//! epoch record when the neural family was used.
//!
//! Precision, recall and F1 are support-weighted averages over the sorted
//! union of labels present in `y_true` and `y_pred`. A label with no
//! predicted rows has precision 0.

use std::collections::BTreeSet;

use ndarray::Array1;
use tracing::{debug, warn};

use crate::config::ProblemType;
use crate::error::{ExperimentError, Result};
use crate::models::TrainingOutcome;
use crate::types::{ConfusionMatrix, EpochRecord, Metrics, PredictionPair, RocCurve};

/// Metrics plus the artifacts stored alongside them in an experiment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub metrics: Metrics,
    pub confusion_matrix: Option<ConfusionMatrix>,
    pub roc_curve: Option<RocCurve>,
    pub residuals: Option<Vec<f64>>,
    pub predictions: Option<Vec<PredictionPair>>,
}

// =============================================================================
// Classification
// =============================================================================

/// Fraction of positions where prediction equals truth.
pub fn accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len() as f64
}

fn label_union(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Vec<usize> {
    y_true
        .iter()
        .chain(y_pred.iter())
        .map(|&v| v as usize)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Weighted precision, recall and F1.
pub fn precision_recall_f1(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> (f64, f64, f64) {
    let labels = label_union(y_true, y_pred);
    let total = y_true.len() as f64;
    if total == 0.0 {
        return (0.0, 0.0, 0.0);
    }

    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for label in labels {
        let mut tp = 0usize;
        let mut predicted = 0usize;
        let mut support = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            let (t, p) = (t as usize, p as usize);
            if p == label {
                predicted += 1;
            }
            if t == label {
                support += 1;
                if p == label {
                    tp += 1;
                }
            }
        }
        if support == 0 {
            continue;
        }
        let p = if predicted == 0 { 0.0 } else { tp as f64 / predicted as f64 };
        let r = tp as f64 / support as f64;
        let f = if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) };
        let weight = support as f64 / total;
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;
    }
    (precision, recall, f1)
}

/// Weighted precision only.
pub fn weighted_precision(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    precision_recall_f1(y_true, y_pred).0
}

/// Confusion matrix over the union of observed labels, named by `classes`.
pub fn confusion_matrix(
    y_true: &Array1<f64>,
    y_pred: &Array1<f64>,
    classes: &[String],
) -> ConfusionMatrix {
    let labels = label_union(y_true, y_pred);
    let position = |label: usize| labels.iter().position(|&l| l == label);

    let mut matrix = vec![vec![0u64; labels.len()]; labels.len()];
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        if let (Some(i), Some(j)) = (position(t as usize), position(p as usize)) {
            matrix[i][j] += 1;
        }
    }

    ConfusionMatrix {
        labels: labels
            .iter()
            .map(|&l| classes.get(l).cloned().unwrap_or_else(|| l.to_string()))
            .collect(),
        matrix,
    }
}

/// ROC curve for a binary target with class 1 as positive.
///
/// Returns `None` when `y_true` lacks either class. Collinear intermediate
/// points are dropped and the curve starts at (0, 0).
pub fn roc_curve(y_true: &Array1<f64>, scores: &Array1<f64>) -> Option<RocCurve> {
    let mut order: Vec<usize> = (0..y_true.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // Cumulative counts at each distinct threshold.
    let mut tps: Vec<f64> = Vec::new();
    let mut fps: Vec<f64> = Vec::new();
    let (mut tp, mut fp) = (0.0, 0.0);
    for (k, &i) in order.iter().enumerate() {
        if y_true[i] == 1.0 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let last_of_threshold = order
            .get(k + 1)
            .is_none_or(|&next| scores[next] != scores[i]);
        if last_of_threshold {
            tps.push(tp);
            fps.push(fp);
        }
    }

    if tp == 0.0 || fp == 0.0 {
        return None;
    }

    let n = tps.len();
    let keep: Vec<usize> = (0..n)
        .filter(|&i| {
            if i == 0 || i + 1 == n {
                return true;
            }
            let d2_fps = fps[i + 1] - 2.0 * fps[i] + fps[i - 1];
            let d2_tps = tps[i + 1] - 2.0 * tps[i] + tps[i - 1];
            d2_fps != 0.0 || d2_tps != 0.0
        })
        .collect();

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    for i in keep {
        fpr.push(fps[i] / fp);
        tpr.push(tps[i] / tp);
    }
    let auc = trapezoid_area(&fpr, &tpr);

    Some(RocCurve { fpr, tpr, auc })
}

/// Area under a piecewise-linear curve.
pub fn trapezoid_area(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

// =============================================================================
// Regression
// =============================================================================

/// Mean squared error.
pub fn mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

/// Coefficient of determination.
///
/// A constant `y_true` yields 1.0 for a perfect fit and 0.0 otherwise.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

// =============================================================================
// Engine
// =============================================================================

/// Computes metrics for one training outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsEngine;

impl MetricsEngine {
    /// Compute metrics and artifacts, then reconcile with the epoch history.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Computation`] if predictions and targets
    /// differ in length or contain non-finite values.
    pub fn evaluate(
        &self,
        outcome: &TrainingOutcome,
        y_train: &Array1<f64>,
        y_test: &Array1<f64>,
        problem_type: ProblemType,
        classes: &[String],
    ) -> Result<Evaluation> {
        check_predictions("validation", y_test, &outcome.test_predictions)?;
        check_predictions("training", y_train, &outcome.train_predictions)?;

        let mut evaluation = match problem_type {
            ProblemType::Classification => {
                classification_evaluation(outcome, y_train, y_test, classes)
            }
            ProblemType::Regression => regression_evaluation(outcome, y_train, y_test),
        };

        if let Some(last) = outcome.epochs.last() {
            reconcile_with_epoch(&mut evaluation.metrics, last, problem_type);
        }

        debug!(metrics = ?evaluation.metrics, "Computed metrics");
        Ok(evaluation)
    }
}

fn check_predictions(partition: &str, y: &Array1<f64>, predictions: &Array1<f64>) -> Result<()> {
    if y.len() != predictions.len() {
        return Err(ExperimentError::Computation(format!(
            "{partition} predictions have length {} but the target has {}",
            predictions.len(),
            y.len()
        )));
    }
    if predictions.iter().any(|v| !v.is_finite()) {
        return Err(ExperimentError::Computation(format!(
            "{partition} predictions contain non-finite values"
        )));
    }
    Ok(())
}

fn classification_evaluation(
    outcome: &TrainingOutcome,
    y_train: &Array1<f64>,
    y_test: &Array1<f64>,
    classes: &[String],
) -> Evaluation {
    let predictions = &outcome.test_predictions;
    let (precision, recall, f1) = precision_recall_f1(y_test, predictions);
    let metrics = Metrics {
        accuracy: Some(accuracy(y_test, predictions)),
        precision: Some(precision),
        recall: Some(recall),
        f1_score: Some(f1),
        precision_train: Some(weighted_precision(y_train, &outcome.train_predictions)),
        precision_validation: Some(precision),
        ..Default::default()
    };

    let roc_curve = if classes.len() == 2 {
        let curve = outcome
            .test_probabilities
            .as_ref()
            .filter(|p| p.ncols() == 2)
            .and_then(|p| roc_curve(y_test, &p.column(1).to_owned()));
        if curve.is_none() {
            warn!("Validation partition lacks one of the two classes, skipping ROC curve");
        }
        curve
    } else {
        None
    };

    Evaluation {
        metrics,
        confusion_matrix: Some(confusion_matrix(y_test, predictions, classes)),
        roc_curve,
        residuals: None,
        predictions: None,
    }
}

fn regression_evaluation(
    outcome: &TrainingOutcome,
    y_train: &Array1<f64>,
    y_test: &Array1<f64>,
) -> Evaluation {
    let predictions = &outcome.test_predictions;
    let mse = mean_squared_error(y_test, predictions);
    let metrics = Metrics {
        mse: Some(mse),
        mse_validation: Some(mse),
        mse_train: Some(mean_squared_error(y_train, &outcome.train_predictions)),
        r2_score: Some(r2_score(y_test, predictions)),
        final_loss: Some(mse),
        ..Default::default()
    };

    let residuals = y_test
        .iter()
        .zip(predictions.iter())
        .map(|(t, p)| t - p)
        .collect();
    let pairs = y_test
        .iter()
        .zip(predictions.iter())
        .map(|(&actual, &predicted)| PredictionPair { actual, predicted })
        .collect();

    Evaluation {
        metrics,
        confusion_matrix: None,
        roc_curve: None,
        residuals: Some(residuals),
        predictions: Some(pairs),
    }
}

/// Override final values with the last epoch record.
pub fn reconcile_with_epoch(metrics: &mut Metrics, last: &EpochRecord, problem_type: ProblemType) {
    metrics.final_loss = Some(last.validation_loss);
    match problem_type {
        ProblemType::Classification => {
            if let Some(validation) = last.validation_precision {
                metrics.precision = Some(validation);
                metrics.precision_validation = Some(validation);
            }
            if let Some(train) = last.train_precision {
                metrics.precision_train = Some(train);
            }
        }
        ProblemType::Regression => {
            metrics.mse = Some(last.validation_loss);
            metrics.mse_validation = Some(last.validation_loss);
            metrics.mse_train = Some(last.train_loss);
        }
    }
}
