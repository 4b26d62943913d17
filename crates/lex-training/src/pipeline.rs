//! Training pipeline implementation.
//!
//! This module provides the [`Pipeline`] struct and its builder. A pipeline
//! turns an in-memory table and a [`TrainingConfig`] into an [`Experiment`].
//!
//! # Overview
//!
//! The pipeline executes these stages in order:
//!
//! 1. **Preparing** - Mean imputation, one-hot encoding, predictor extraction
//! 2. **Resolving problem type** - Classification vs regression, target encoding
//! 3. **Splitting** - Seeded (stratified) split and standard scaling
//! 4. **Training** - The trainer selected by the model family
//! 5. **Evaluating** - Metrics, confusion matrix, ROC curve, residuals
//! 6. **Feature importance** - Permutation importance (failures are tolerated)
//!
//! Any failure in stages 1-5 ends the run with an error record.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_training::{ModelFamily, Pipeline, TrainingConfig};
//!
//! let config = TrainingConfig::builder()
//!     .target_column("Survived")
//!     .predictor_columns(["Age", "Fare", "Sex"])
//!     .model_family(ModelFamily::Classifier)
//!     .build()?;
//!
//! let pipeline = Pipeline::builder()
//!     .on_progress(|update| {
//!         println!("[{}] {:.0}% - {}", update.stage.as_str(), update.progress * 100.0, update.message);
//!     })
//!     .build();
//!
//! let experiment = pipeline.run(&dataframe, &config)?;
//! println!("{:?}", experiment.metrics);
//! ```

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use polars::prelude::DataFrame;
use tracing::{error, info, warn};

use crate::assembler::{CompletedRun, ExperimentAssembler};
use crate::config::{ProblemType, TrainingConfig};
use crate::data::{
    DataPreparer, Split, StandardScaler, detect_problem_type, resolve_target, train_test_split,
};
use crate::error::{ExperimentError, Result};
use crate::importance::{ImportanceEngine, ImportanceRequest, PermutationImportance, scorer_for};
use crate::metrics::MetricsEngine;
use crate::models::{TrainedModel, TrainingData, trainer_for};
use crate::progress::{ProgressCallback, ProgressUpdate, TrainingStage};
use crate::types::{EpochRecord, Experiment, FeatureImportance};

// Overall progress at the start of each stage. Training fills the range up to
// `EVALUATING_PROGRESS` epoch by epoch.
const PREPARING_PROGRESS: f64 = 0.05;
const RESOLVING_PROGRESS: f64 = 0.10;
const SPLITTING_PROGRESS: f64 = 0.15;
const TRAINING_PROGRESS: f64 = 0.20;
const EVALUATING_PROGRESS: f64 = 0.85;
const IMPORTANCE_PROGRESS: f64 = 0.90;

/// Result of [`Pipeline::execute()`].
#[derive(Debug)]
pub enum RunOutcome {
    /// The run completed.
    Completed(Experiment),
    /// The run failed. `record` is the error-state experiment to persist.
    Failed {
        record: Box<Experiment>,
        error: ExperimentError,
    },
}

/// The training-and-evaluation pipeline.
///
/// A pipeline holds no per-run state; one instance can run any number of
/// configurations, one at a time or from several threads.
///
/// Use [`Pipeline::builder()`] to register a progress callback or a custom
/// [`ImportanceEngine`].
pub struct Pipeline {
    progress_callback: Option<ProgressCallback>,
    importance_engine: Arc<dyn ImportanceEngine>,
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .field("importance_engine", &"<engine>")
            .finish()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Reports progress and keeps it monotonic within one run.
struct ProgressReporter<'a> {
    callback: Option<&'a ProgressCallback>,
    last: Cell<f64>,
}

impl<'a> ProgressReporter<'a> {
    fn new(callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            callback,
            last: Cell::new(0.0),
        }
    }

    fn report(&self, stage: TrainingStage, progress: f64, message: impl Into<String>) {
        self.send(stage, progress, message.into(), None);
    }

    fn epoch(&self, record: &EpochRecord, total: u32) {
        let fraction = f64::from(record.epoch) / f64::from(total.max(1));
        self.send(
            TrainingStage::Training,
            TRAINING_PROGRESS + (EVALUATING_PROGRESS - TRAINING_PROGRESS) * fraction,
            format!(
                "Epoch {}/{} - loss {:.4}, validation loss {:.4}",
                record.epoch, total, record.train_loss, record.validation_loss
            ),
            Some((record.epoch, total)),
        );
    }

    fn send(&self, stage: TrainingStage, progress: f64, message: String, epoch: Option<(u32, u32)>) {
        let progress = progress.clamp(self.last.get(), 1.0);
        self.last.set(progress);
        if let Some(callback) = self.callback {
            callback(ProgressUpdate {
                stage,
                progress,
                message,
                epoch,
            });
        }
    }
}

impl Pipeline {
    /// Create a new builder for `Pipeline`.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run the pipeline and return the completed experiment.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage. Use
    /// [`execute()`](Self::execute) to also obtain the error record.
    pub fn run(&self, df: &DataFrame, config: &TrainingConfig) -> Result<Experiment> {
        match self.execute(df, config) {
            RunOutcome::Completed(experiment) => Ok(experiment),
            RunOutcome::Failed { error, .. } => Err(error),
        }
    }

    /// Run the pipeline, returning either the completed experiment or the
    /// error record together with the error.
    pub fn execute(&self, df: &DataFrame, config: &TrainingConfig) -> RunOutcome {
        let started = Instant::now();
        let reporter = ProgressReporter::new(self.progress_callback.as_ref());
        reporter.report(TrainingStage::Initializing, 0.0, "Validating configuration");

        let mut problem_type = None;
        match self.run_stages(df, config, &reporter, &mut problem_type, started) {
            Ok(experiment) => {
                info!(
                    id = %experiment.id,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Training complete"
                );
                reporter.report(TrainingStage::Complete, 1.0, "Training complete");
                RunOutcome::Completed(experiment)
            }
            Err(err) => {
                error!(code = err.error_code(), error = %err, "Training failed");
                reporter.report(TrainingStage::Failed, 0.0, err.to_string());
                let record = ExperimentAssembler.failed(config, problem_type, &err);
                RunOutcome::Failed {
                    record: Box::new(record),
                    error: err,
                }
            }
        }
    }

    fn run_stages(
        &self,
        df: &DataFrame,
        config: &TrainingConfig,
        reporter: &ProgressReporter<'_>,
        problem_type: &mut Option<ProblemType>,
        started: Instant,
    ) -> Result<Experiment> {
        config.validate()?;
        info!(
            dataset = %config.dataset_id,
            target = %config.target_column,
            family = %config.model_family,
            "Starting training"
        );

        // 1. Preparation
        reporter.report(TrainingStage::Preparing, PREPARING_PROGRESS, "Preparing features");
        let prepared = DataPreparer.prepare(df, config)?;
        info!(
            rows = prepared.n_rows(),
            features = prepared.feature_names.len(),
            "Prepared dataset"
        );

        // 2. Problem type
        reporter.report(
            TrainingStage::ResolvingProblemType,
            RESOLVING_PROGRESS,
            "Detecting problem type",
        );
        let detected = detect_problem_type(&prepared.target)?;
        *problem_type = Some(detected);
        let target = resolve_target(&prepared.target, detected, config.model_family)?;

        // 3. Split and scale
        reporter.report(TrainingStage::Splitting, SPLITTING_PROGRESS, "Splitting dataset");
        let stratify = (target.problem_type == ProblemType::Classification)
            .then_some(target.n_classes());
        let raw = train_test_split(
            &prepared.features,
            &target.values,
            config.validation_split,
            stratify,
            config.random_seed,
        )?;
        let scaler = StandardScaler::fit(&raw.x_train)?;
        let split = Split {
            x_train: scaler.transform(&raw.x_train),
            x_test: scaler.transform(&raw.x_test),
            ..raw
        };
        info!(
            train_rows = split.y_train.len(),
            validation_rows = split.y_test.len(),
            "Split dataset"
        );

        // 4. Training
        let trainer = trainer_for(config);
        reporter.report(
            TrainingStage::Training,
            TRAINING_PROGRESS,
            format!("Training {}", trainer.name()),
        );
        let data = TrainingData::from_split(&split, target.problem_type, target.n_classes());
        let outcome = trainer.fit(&data, &mut |record: &EpochRecord| {
            reporter.epoch(record, config.epochs)
        })?;

        // 5. Metrics
        reporter.report(TrainingStage::Evaluating, EVALUATING_PROGRESS, "Computing metrics");
        let evaluation = MetricsEngine.evaluate(
            &outcome,
            &split.y_train,
            &split.y_test,
            target.problem_type,
            &target.classes,
        )?;
        let elapsed = started.elapsed();

        // 6. Feature importance
        reporter.report(
            TrainingStage::FeatureImportance,
            IMPORTANCE_PROGRESS,
            "Computing feature importance",
        );
        let feature_importance = self.feature_importance(
            &outcome.model,
            &split,
            &prepared.feature_names,
            target.problem_type,
            config,
        );

        Ok(ExperimentAssembler.completed(
            config,
            CompletedRun {
                problem_type: target.problem_type,
                classes: target.classes,
                evaluation,
                epochs: outcome.epochs,
                epoch_durations: outcome.epoch_durations,
                feature_importance,
                elapsed,
            },
        ))
    }

    fn feature_importance(
        &self,
        model: &TrainedModel,
        split: &Split,
        feature_names: &[String],
        problem_type: ProblemType,
        config: &TrainingConfig,
    ) -> Option<Vec<FeatureImportance>> {
        let scorer = scorer_for(model, problem_type);
        let request = ImportanceRequest {
            x: &split.x_test,
            y: &split.y_test,
            feature_names,
            repeats: config.importance_repeats,
            seed: config.random_seed,
        };
        // Panics in the engine, the scorer or a rayon worker degrade like errors.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.importance_engine.compute(scorer.as_ref(), &request)
        }));
        match result {
            Ok(Ok(importances)) => Some(importances),
            Ok(Err(err)) => {
                warn!(error = %err, "Feature importance failed, continuing without it");
                None
            }
            Err(payload) => {
                warn!(
                    panic = panic_message(payload.as_ref()),
                    "Feature importance panicked, continuing without it"
                );
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Builder for [`Pipeline`].
///
/// # Optional Configuration
///
/// - [`on_progress()`](Self::on_progress): Progress callback for monitoring
/// - [`importance_engine()`](Self::importance_engine): Replaces the default
///   [`PermutationImportance`] engine
#[derive(Default)]
pub struct PipelineBuilder {
    progress_callback: Option<ProgressCallback>,
    importance_engine: Option<Arc<dyn ImportanceEngine>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .field(
                "importance_engine",
                &self.importance_engine.as_ref().map(|_| "<engine>"),
            )
            .finish()
    }
}

impl PipelineBuilder {
    /// Set the progress callback (optional).
    ///
    /// The callback receives [`ProgressUpdate`] structs during the run. It
    /// runs on the training thread and should return quickly.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Set the feature importance engine (optional).
    #[must_use]
    pub fn importance_engine<E>(mut self, engine: E) -> Self
    where
        E: ImportanceEngine + 'static,
    {
        self.importance_engine = Some(Arc::new(engine));
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline {
            progress_callback: self.progress_callback,
            importance_engine: self
                .importance_engine
                .unwrap_or_else(|| Arc::new(PermutationImportance)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelFamily;
    use crate::importance::ImportanceScorer;
    use parking_lot::Mutex;
    use polars::prelude::*;

    fn regression_frame(n: usize) -> DataFrame {
        let x1: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let x2: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64).collect();
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 3.0 * a - b + 0.5).collect();
        df!["x1" => x1, "x2" => x2, "y" => y].unwrap()
    }

    fn regression_config() -> TrainingConfig {
        TrainingConfig::builder()
            .dataset_id("reg")
            .target_column("y")
            .predictor_columns(["x1", "x2"])
            .model_family(ModelFamily::Regressor)
            .importance_repeats(3)
            .build()
            .unwrap()
    }

    struct BrokenEngine;

    impl ImportanceEngine for BrokenEngine {
        fn compute(
            &self,
            _scorer: &dyn ImportanceScorer,
            _request: &ImportanceRequest<'_>,
        ) -> Result<Vec<FeatureImportance>> {
            Err(ExperimentError::Computation("forced failure".to_string()))
        }
    }

    #[test]
    fn test_pipeline_debug_hides_callback() {
        let pipeline = Pipeline::builder().on_progress(|_| {}).build();
        let debug = format!("{pipeline:?}");
        assert!(debug.contains("<callback>"));
    }

    #[test]
    fn test_regression_run_completes() {
        let experiment = Pipeline::default()
            .run(&regression_frame(40), &regression_config())
            .unwrap();

        assert!(experiment.is_completed());
        assert_eq!(experiment.problem_type, Some(ProblemType::Regression));
        let metrics = experiment.metrics.evaluated().unwrap();
        assert!(metrics.r2_score.unwrap() > 0.99);
        assert_eq!(experiment.residuals.as_ref().map(Vec::len), Some(8));
        assert_eq!(experiment.feature_importance.as_ref().map(Vec::len), Some(2));
        assert!(experiment.epochs.is_empty());
    }

    #[test]
    fn test_importance_failure_degrades_to_none() {
        let experiment = Pipeline::builder()
            .importance_engine(BrokenEngine)
            .build()
            .run(&regression_frame(40), &regression_config())
            .unwrap();

        assert!(experiment.is_completed());
        assert!(experiment.feature_importance.is_none());
    }

    #[test]
    fn test_progress_is_monotonic_and_terminal() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let pipeline = Pipeline::builder()
            .on_progress(move |u| sink.lock().push(u))
            .build();
        pipeline
            .run(&regression_frame(40), &regression_config())
            .unwrap();

        let updates = updates.lock();
        assert!(updates.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert_eq!(updates.first().map(|u| u.stage), Some(TrainingStage::Initializing));
        assert_eq!(updates.last().map(|u| u.stage), Some(TrainingStage::Complete));
    }

    #[test]
    fn test_failure_produces_error_record() {
        let df = df!["x1" => [1.0, 2.0, 3.0], "y" => ["a", "b", "a"]].unwrap();
        let config = TrainingConfig::builder()
            .target_column("y")
            .predictor_columns(["x1"])
            .model_family(ModelFamily::Regressor)
            .build()
            .unwrap();

        match Pipeline::default().execute(&df, &config) {
            RunOutcome::Failed { record, error } => {
                assert_eq!(error.error_code(), "TYPE_CONFLICT");
                assert_eq!(record.problem_type, Some(ProblemType::Classification));
                assert!(!record.is_completed());
                assert!(record.metrics.error().is_some());
            }
            RunOutcome::Completed(_) => panic!("expected a failure"),
        }
    }

    #[test]
    fn test_failure_before_detection_has_no_problem_type() {
        let df = df!["x1" => [1.0, 2.0, 3.0]].unwrap();
        let config = TrainingConfig::builder()
            .target_column("y")
            .predictor_columns(["x1"])
            .build()
            .unwrap();

        match Pipeline::default().execute(&df, &config) {
            RunOutcome::Failed { record, error } => {
                assert_eq!(error.error_code(), "CONFIGURATION_ERROR");
                assert_eq!(record.problem_type, None);
            }
            RunOutcome::Completed(_) => panic!("expected a failure"),
        }
    }

    struct PanickingEngine;

    impl ImportanceEngine for PanickingEngine {
        fn compute(
            &self,
            _scorer: &dyn ImportanceScorer,
            _request: &ImportanceRequest<'_>,
        ) -> Result<Vec<FeatureImportance>> {
            panic!("engine blew up")
        }
    }

    #[test]
    fn test_importance_panic_degrades_to_none() {
        let experiment = Pipeline::builder()
            .importance_engine(PanickingEngine)
            .build()
            .run(&regression_frame(40), &regression_config())
            .unwrap();

        assert!(experiment.is_completed());
        assert!(experiment.feature_importance.is_none());
    }

    #[test]
    fn test_panic_message_extraction() {
        let literal: Box<dyn Any + Send> = Box::new("static message");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(literal.as_ref()), "static message");
        assert_eq!(panic_message(owned.as_ref()), "owned message");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
