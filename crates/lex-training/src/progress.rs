//! Progress reporting types for the training pipeline.
//!
//! This module defines [`TrainingStage`], [`ProgressUpdate`] and the
//! [`ProgressCallback`] type alias.
//!
//! Progress reporting is observational only: a callback never changes what
//! the pipeline computes.
//!
//! # Example
//!
//! ```
//! use lex_training::{Pipeline, ProgressUpdate};
//!
//! let pipeline = Pipeline::builder()
//!     .on_progress(|update: ProgressUpdate| {
//!         println!(
//!             "[{}] {:.0}% - {}",
//!             update.stage.as_str(),
//!             update.progress * 100.0,
//!             update.message
//!         );
//!         if let Some((current, total)) = update.epoch {
//!             println!("  Epoch: {}/{}", current, total);
//!         }
//!     })
//!     .build();
//! ```

use std::sync::Arc;

/// The current stage of the training pipeline.
///
/// A successful run passes through these stages in order:
///
/// 1. [`Initializing`](Self::Initializing)
/// 2. [`Preparing`](Self::Preparing) - imputation and categorical encoding
/// 3. [`ResolvingProblemType`](Self::ResolvingProblemType) - detecting and encoding the target
/// 4. [`Splitting`](Self::Splitting) - train/validation split and scaling
/// 5. [`Training`](Self::Training)
/// 6. [`Evaluating`](Self::Evaluating) - final metrics, confusion matrix, ROC
/// 7. [`FeatureImportance`](Self::FeatureImportance)
/// 8. [`Complete`](Self::Complete)
///
/// Terminal states: [`Complete`](Self::Complete), [`Failed`](Self::Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TrainingStage {
    /// Pipeline is initializing and validating its configuration.
    #[default]
    Initializing,

    /// Filling missing values and one-hot encoding categorical predictors.
    Preparing,

    /// Detecting classification vs regression and encoding the target.
    ResolvingProblemType,

    /// Partitioning rows and standardizing features.
    Splitting,

    /// Fitting the model.
    ///
    /// For the neural family this stage emits one update per epoch.
    Training,

    /// Computing final metrics on both partitions.
    Evaluating,

    /// Computing permutation importance.
    FeatureImportance,

    /// Training completed successfully.
    ///
    /// This is a terminal state.
    Complete,

    /// Training failed.
    ///
    /// This is a terminal state. The message carries the error description.
    Failed,
}

impl TrainingStage {
    /// Returns the snake_case name of the stage.
    ///
    /// # Examples
    ///
    /// ```
    /// use lex_training::TrainingStage;
    ///
    /// assert_eq!(TrainingStage::Training.as_str(), "training");
    /// assert_eq!(TrainingStage::ResolvingProblemType.as_str(), "resolving_problem_type");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStage::Initializing => "initializing",
            TrainingStage::Preparing => "preparing",
            TrainingStage::ResolvingProblemType => "resolving_problem_type",
            TrainingStage::Splitting => "splitting",
            TrainingStage::Training => "training",
            TrainingStage::Evaluating => "evaluating",
            TrainingStage::FeatureImportance => "feature_importance",
            TrainingStage::Complete => "complete",
            TrainingStage::Failed => "failed",
        }
    }

    /// Returns `true` if this is a terminal state.
    ///
    /// ```
    /// use lex_training::TrainingStage;
    ///
    /// assert!(TrainingStage::Complete.is_terminal());
    /// assert!(TrainingStage::Failed.is_terminal());
    /// assert!(!TrainingStage::Training.is_terminal());
    /// ```
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStage::Complete | TrainingStage::Failed)
    }
}

/// A progress update from the training pipeline.
///
/// # Example
///
/// ```
/// use lex_training::{ProgressUpdate, TrainingStage};
///
/// let update = ProgressUpdate {
///     stage: TrainingStage::Training,
///     progress: 0.5,
///     message: "Epoch 10/20".to_string(),
///     epoch: Some((10, 20)),
/// };
///
/// println!("{:.0}% complete", update.progress * 100.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// The current training stage.
    pub stage: TrainingStage,

    /// Overall progress from 0.0 to 1.0.
    ///
    /// Progress increases monotonically during a run.
    pub progress: f64,

    /// Human-readable status message.
    pub message: String,

    /// Current and total epoch: `(current, total)`.
    ///
    /// Only populated while the neural family is training.
    pub epoch: Option<(u32, u32)>,
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl Default for ProgressUpdate {
    fn default() -> Self {
        Self {
            stage: TrainingStage::default(),
            progress: 0.0,
            message: String::new(),
            epoch: None,
        }
    }
}

/// Type alias for a progress callback function.
///
/// Callbacks must be thread-safe (`Send + Sync`) and should return quickly;
/// they run on the training thread.
///
/// ```
/// use std::sync::Arc;
/// use lex_training::{ProgressCallback, ProgressUpdate};
///
/// let callback: ProgressCallback = Arc::new(|update: ProgressUpdate| {
///     println!("[{:?}] {} - {}", update.stage, update.progress, update.message);
/// });
/// ```
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;
