//! Integration tests for lex-training.
//!
//! These tests drive the public API end to end: the pipeline on in-memory
//! tables and the experiment service with an in-memory store.

use std::sync::Arc;

use lex_training::data::StandardScaler;
use lex_training::importance::{ImportanceEngine, ImportanceRequest, ImportanceScorer};
use lex_training::{
    DatasetLoader, ExperimentError, ExperimentService, ExperimentState, FeatureImportance,
    InMemoryStore, ModelFamily, Pipeline, ProblemType, Result, RunOutcome, TrainingConfig,
    TrainingStage,
};
use ndarray::Array2;
use parking_lot::Mutex;
use polars::prelude::*;
use pretty_assertions::assert_eq;

// =============================================================================
// Fixtures
// =============================================================================

/// 100 rows, 4 columns: two numeric predictors, one text predictor and a
/// two-class text target that depends on the numeric predictors.
///
/// `color` encodes to `color_green` and `color_red`; `blue` is dropped as the
/// first category.
fn binary_frame() -> DataFrame {
    let n = 100;
    let x1: Vec<f64> = (0..n).map(|i| f64::from(i) / 10.0).collect();
    let x2: Vec<f64> = (0..n).map(|i| f64::from((i * 7) % 13)).collect();
    let color: Vec<&str> = (0..n)
        .map(|i| ["red", "green", "blue"][(i % 3) as usize])
        .collect();
    let label: Vec<&str> = x1
        .iter()
        .zip(&x2)
        .map(|(a, b)| if a + 0.2 * b > 6.0 { "yes" } else { "no" })
        .collect();
    df!["x1" => x1, "x2" => x2, "color" => color, "label" => label].unwrap()
}

fn three_class_frame() -> DataFrame {
    let n = 90;
    let x: Vec<f64> = (0..n).map(f64::from).collect();
    let noise: Vec<f64> = (0..n).map(|i| f64::from((i * 11) % 7)).collect();
    let label: Vec<&str> = (0..n)
        .map(|i| match i / 30 {
            0 => "low",
            1 => "mid",
            _ => "high",
        })
        .collect();
    df!["x" => x, "noise" => noise, "label" => label].unwrap()
}

/// Continuous target with a little deterministic noise.
fn regression_frame() -> DataFrame {
    let n = 100;
    let a: Vec<f64> = (0..n).map(|i| f64::from(i) / 4.0).collect();
    let b: Vec<f64> = (0..n).map(|i| f64::from((i * 17) % 23)).collect();
    let target: Vec<f64> = a
        .iter()
        .zip(&b)
        .enumerate()
        .map(|(i, (a, b))| 1.5 * a - 0.5 * b + 0.1 * ((i % 5) as f64 - 2.0))
        .collect();
    df!["a" => a, "b" => b, "target" => target].unwrap()
}

fn classification_config(family: ModelFamily) -> TrainingConfig {
    TrainingConfig::builder()
        .dataset_id("binary")
        .target_column("label")
        .predictor_columns(["x1", "x2", "color_red"])
        .model_family(family)
        .importance_repeats(3)
        .build()
        .unwrap()
}

fn regression_config(family: ModelFamily) -> TrainingConfig {
    TrainingConfig::builder()
        .dataset_id("regression")
        .target_column("target")
        .predictor_columns(["a", "b"])
        .model_family(family)
        .epochs(5)
        .importance_repeats(3)
        .build()
        .unwrap()
}

fn expected_test_rows(n: usize, fraction: f64) -> usize {
    (fraction * n as f64).ceil() as usize
}

struct FrameLoader(DataFrame);

impl DatasetLoader for FrameLoader {
    fn load(&self, _dataset_id: &str) -> Result<DataFrame> {
        Ok(self.0.clone())
    }
}

struct FailingImportance;

struct PanickingImportance;

impl ImportanceEngine for PanickingImportance {
    fn compute(
        &self,
        _scorer: &dyn ImportanceScorer,
        _request: &ImportanceRequest<'_>,
    ) -> Result<Vec<FeatureImportance>> {
        panic!("importance engine crashed")
    }
}

impl ImportanceEngine for FailingImportance {
    fn compute(
        &self,
        _scorer: &dyn ImportanceScorer,
        _request: &ImportanceRequest<'_>,
    ) -> Result<Vec<FeatureImportance>> {
        Err(ExperimentError::Computation("scoring failed".to_string()))
    }
}

fn in_unit_interval(value: Option<f64>) -> bool {
    value.is_some_and(|v| (0.0..=1.0).contains(&v))
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_binary_classifier_experiment() {
    let experiment = Pipeline::default()
        .run(&binary_frame(), &classification_config(ModelFamily::Classifier))
        .unwrap();

    assert_eq!(experiment.state, ExperimentState::Completed);
    assert_eq!(experiment.problem_type, Some(ProblemType::Classification));

    let metrics = experiment.metrics.evaluated().unwrap();
    assert!(in_unit_interval(metrics.accuracy));
    assert!(in_unit_interval(metrics.precision));
    assert!(in_unit_interval(metrics.recall));
    assert!(in_unit_interval(metrics.f1_score));

    let confusion = experiment.confusion_matrix.as_ref().unwrap();
    assert_eq!(confusion.matrix.len(), 2);
    assert!(confusion.matrix.iter().all(|row| row.len() == 2));
    let total: u64 = confusion.matrix.iter().flatten().sum();
    assert_eq!(total as usize, expected_test_rows(100, 0.2));

    let roc = experiment.roc_curve.as_ref().unwrap();
    assert!((0.0..=1.0).contains(&roc.auc));
    assert_eq!(roc.fpr.len(), roc.tpr.len());

    assert_eq!(
        experiment.class_labels,
        Some(vec!["no".to_string(), "yes".to_string()])
    );
    assert!(experiment.epochs.is_empty());
    assert!(experiment.residuals.is_none());
}

#[test]
fn test_declared_regression_on_text_target_conflicts() {
    let err = Pipeline::default()
        .run(&binary_frame(), &classification_config(ModelFamily::Regressor))
        .unwrap_err();

    assert!(matches!(err, ExperimentError::TypeConflict { .. }));
}

#[test]
fn test_type_conflict_precedes_encoding_and_split() {
    // One row with one class: encoding would reject the class count and the
    // split would leave a partition empty. The conflict is reported first.
    let df = df!["x" => [1.0], "label" => ["only"]].unwrap();
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["x"])
        .model_family(ModelFamily::Regressor)
        .build()
        .unwrap();

    match Pipeline::default().execute(&df, &config) {
        RunOutcome::Failed { record, error } => {
            assert_eq!(error.error_code(), "TYPE_CONFLICT");
            assert_eq!(record.problem_type, Some(ProblemType::Classification));
        }
        RunOutcome::Completed(_) => panic!("expected a type conflict"),
    }
}

#[test]
fn test_boolean_target_trains_as_regression() {
    let n = 40;
    let x: Vec<f64> = (0..n).map(f64::from).collect();
    let flag: Vec<bool> = (0..n).map(|i| i >= 20).collect();
    let df = df!["x" => x, "flag" => flag].unwrap();
    let mut config = TrainingConfig::builder()
        .target_column("flag")
        .predictor_columns(["x"])
        .model_family(ModelFamily::Regressor)
        .importance_repeats(1)
        .build()
        .unwrap();

    let experiment = Pipeline::default().run(&df, &config).unwrap();
    assert_eq!(experiment.problem_type, Some(ProblemType::Regression));
    assert!(experiment.class_labels.is_none());

    config.model_family = ModelFamily::Classifier;
    let err = Pipeline::default().run(&df, &config).unwrap_err();
    assert_eq!(err.error_code(), "TYPE_CONFLICT");
}

#[test]
fn test_neural_regression_epochs_and_final_loss() {
    let experiment = Pipeline::default()
        .run(&regression_frame(), &regression_config(ModelFamily::Neural))
        .unwrap();

    assert_eq!(experiment.problem_type, Some(ProblemType::Regression));
    assert_eq!(experiment.epochs.len(), 5);
    assert_eq!(experiment.epoch_durations.len(), 5);
    assert_eq!(
        experiment.epochs.iter().map(|e| e.epoch).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );

    let metrics = experiment.metrics.evaluated().unwrap();
    assert_eq!(metrics.final_loss, Some(experiment.epochs[4].validation_loss));
    assert_eq!(metrics.mse, Some(experiment.epochs[4].validation_loss));

    let test_rows = expected_test_rows(100, 0.2);
    assert_eq!(experiment.residuals.as_ref().map(Vec::len), Some(test_rows));
    assert_eq!(experiment.predictions.as_ref().map(Vec::len), Some(test_rows));
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_roc_absent_for_three_classes() {
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["x", "noise"])
        .model_family(ModelFamily::Classifier)
        .importance_repeats(2)
        .build()
        .unwrap();
    let experiment = Pipeline::default()
        .run(&three_class_frame(), &config)
        .unwrap();

    assert!(experiment.roc_curve.is_none());
    assert_eq!(experiment.class_labels.as_ref().map(Vec::len), Some(3));
    assert_eq!(experiment.confusion_matrix.as_ref().unwrap().matrix.len(), 3);
}

#[test]
fn test_neural_multiclass_experiment() {
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["x", "noise"])
        .model_family(ModelFamily::Neural)
        .epochs(4)
        .importance_repeats(2)
        .build()
        .unwrap();
    let experiment = Pipeline::default()
        .run(&three_class_frame(), &config)
        .unwrap();

    assert_eq!(experiment.problem_type, Some(ProblemType::Classification));
    assert_eq!(experiment.epochs.len(), 4);
    assert!(experiment.roc_curve.is_none());

    let confusion = experiment.confusion_matrix.as_ref().unwrap();
    assert_eq!(confusion.matrix.len(), 3);
    assert!(confusion.matrix.iter().all(|row| row.len() == 3));
    let total: u64 = confusion.matrix.iter().flatten().sum();
    assert_eq!(total as usize, expected_test_rows(90, 0.2));

    let last = experiment.epochs.last().unwrap();
    let metrics = experiment.metrics.evaluated().unwrap();
    assert_eq!(metrics.final_loss, Some(last.validation_loss));
    assert_eq!(metrics.precision_validation, last.validation_precision);
    assert!(in_unit_interval(metrics.accuracy));
}

#[test]
fn test_neural_classification_reconciles_precision() {
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["x1", "x2", "color_green"])
        .model_family(ModelFamily::Neural)
        .epochs(3)
        .importance_repeats(2)
        .build()
        .unwrap();
    let experiment = Pipeline::default().run(&binary_frame(), &config).unwrap();

    let last = experiment.epochs.last().unwrap();
    let metrics = experiment.metrics.evaluated().unwrap();
    assert_eq!(metrics.final_loss, Some(last.validation_loss));
    assert_eq!(metrics.precision_validation, last.validation_precision);
    assert_eq!(metrics.precision_train, last.train_precision);
    assert!(experiment.roc_curve.is_some());
}

#[test]
fn test_regression_metric_bounds() {
    let experiment = Pipeline::default()
        .run(&regression_frame(), &regression_config(ModelFamily::Regressor))
        .unwrap();

    let metrics = experiment.metrics.evaluated().unwrap();
    assert!(metrics.mse.unwrap() >= 0.0);
    assert!(metrics.r2_score.unwrap() <= 1.0);
    assert_eq!(metrics.final_loss, metrics.mse);

    let pairs = experiment.predictions.as_ref().unwrap();
    let residuals = experiment.residuals.as_ref().unwrap();
    for (pair, residual) in pairs.iter().zip(residuals) {
        assert_eq!(pair.actual - pair.predicted, *residual);
    }
}

#[test]
fn test_class_cardinality_ignores_missing_values() {
    let n = 40;
    let x: Vec<f64> = (0..n).map(f64::from).collect();
    let label: Vec<Option<&str>> = (0..n)
        .map(|i| match i % 5 {
            0 => None,
            1 | 2 => Some("a"),
            3 => Some("b"),
            _ => Some("c"),
        })
        .collect();
    let df = df!["x" => x, "label" => label].unwrap();
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["x"])
        .model_family(ModelFamily::Classifier)
        .importance_repeats(1)
        .build()
        .unwrap();

    let experiment = Pipeline::default().run(&df, &config).unwrap();
    assert_eq!(
        experiment.class_labels,
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
}

#[test]
fn test_single_class_target_is_rejected() {
    let df = df![
        "x" => [1.0, 2.0, 3.0, 4.0],
        "label" => [Some("only"), None, Some("only"), Some("only")],
    ]
    .unwrap();
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["x"])
        .model_family(ModelFamily::Classifier)
        .build()
        .unwrap();

    let err = Pipeline::default().run(&df, &config).unwrap_err();
    assert!(matches!(
        err,
        ExperimentError::InsufficientClasses { found: 1, .. }
    ));
}

#[test]
fn test_scaler_transform_is_pure() {
    let x = Array2::from_shape_fn((12, 3), |(i, j)| (i * (j + 1)) as f64 + 0.5);
    let scaler = StandardScaler::fit(&x).unwrap();

    let first = scaler.transform(&x);
    let second = scaler.transform(&x);
    assert_eq!(first, second);
}

#[test]
fn test_importance_failure_completes_without_importance() {
    let pipeline = Pipeline::builder()
        .importance_engine(FailingImportance)
        .build();
    let experiment = pipeline
        .run(&binary_frame(), &classification_config(ModelFamily::Classifier))
        .unwrap();

    assert!(experiment.is_completed());
    assert!(experiment.feature_importance.is_none());
}

#[test]
fn test_importance_panic_completes_without_importance() {
    let pipeline = Pipeline::builder()
        .importance_engine(PanickingImportance)
        .build();
    let experiment = pipeline
        .run(&regression_frame(), &regression_config(ModelFamily::Regressor))
        .unwrap();

    assert!(experiment.is_completed());
    assert!(experiment.feature_importance.is_none());
    assert!(experiment.metrics.evaluated().is_some());
}

#[test]
fn test_predictors_are_restricted_to_encoded_columns() {
    // `color` itself is replaced by its indicators and skipped; the
    // indicator `color_red` is kept in configured order.
    let config = TrainingConfig::builder()
        .target_column("label")
        .predictor_columns(["color", "color_red", "x1"])
        .model_family(ModelFamily::Classifier)
        .importance_repeats(1)
        .build()
        .unwrap();
    let experiment = Pipeline::default().run(&binary_frame(), &config).unwrap();

    let mut features: Vec<String> = experiment
        .feature_importance
        .unwrap()
        .into_iter()
        .map(|f| f.feature)
        .collect();
    features.sort();
    assert_eq!(features, vec!["color_red".to_string(), "x1".to_string()]);
}

#[test]
fn test_importance_is_sorted_descending() {
    let experiment = Pipeline::default()
        .run(&regression_frame(), &regression_config(ModelFamily::Regressor))
        .unwrap();

    let importances = experiment.feature_importance.unwrap();
    assert_eq!(importances.len(), 2);
    assert!(importances[0].importance >= importances[1].importance);
}

#[test]
fn test_progress_reports_epochs() {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let pipeline = Pipeline::builder()
        .on_progress(move |update| sink.lock().push(update))
        .build();
    pipeline
        .run(&regression_frame(), &regression_config(ModelFamily::Neural))
        .unwrap();

    let updates = updates.lock();
    let epochs: Vec<_> = updates.iter().filter_map(|u| u.epoch).collect();
    assert_eq!(epochs, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    assert!(updates.windows(2).all(|w| w[0].progress <= w[1].progress));
    assert_eq!(updates.last().map(|u| u.stage), Some(TrainingStage::Complete));
}

// =============================================================================
// Service
// =============================================================================

#[test]
fn test_target_in_predictors_persists_nothing() {
    let service = ExperimentService::new(FrameLoader(binary_frame()), InMemoryStore::new());
    let config = TrainingConfig {
        target_column: "label".to_string(),
        predictor_columns: vec!["x1".to_string(), "label".to_string()],
        model_family: ModelFamily::Classifier,
        ..Default::default()
    };

    let err = service.train(&config).unwrap_err();
    assert!(matches!(err, ExperimentError::Configuration(_)));
    assert!(service.store().experiments().is_empty());
}

#[test]
fn test_type_conflict_persists_error_record() {
    let service = ExperimentService::new(FrameLoader(binary_frame()), InMemoryStore::new());
    let err = service
        .train(&classification_config(ModelFamily::Regressor))
        .unwrap_err();

    assert_eq!(err.error_code(), "TYPE_CONFLICT");
    let stored = service.store().experiments();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].state, ExperimentState::Error);
    assert_eq!(stored[0].problem_type, Some(ProblemType::Classification));
    assert!(stored[0].name.starts_with("Failed Experiment - "));
    assert_eq!(stored[0].metrics.error(), Some(err.to_string().as_str()));
}

#[test]
fn test_completed_experiment_is_persisted() {
    let service = ExperimentService::new(FrameLoader(regression_frame()), InMemoryStore::new());
    let experiment = service
        .train(&regression_config(ModelFamily::Regressor))
        .unwrap();

    let stored = service.store().get(&experiment.id).unwrap();
    assert_eq!(stored, experiment);
    assert!(stored.name.starts_with("Experiment_"));
}

#[test]
fn test_experiment_serializes_to_json() {
    let experiment = Pipeline::default()
        .run(&binary_frame(), &classification_config(ModelFamily::Classifier))
        .unwrap();

    let json = serde_json::to_value(&experiment).unwrap();
    assert_eq!(json["state"], "completed");
    assert_eq!(json["problem_type"], "classification");
    assert!(json["metrics"]["accuracy"].is_number());
    assert!(json.get("residuals").is_none());
}
