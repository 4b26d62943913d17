//! Configuration types for the training pipeline.
//!
//! This module provides [`TrainingConfig`] and its builder, the declared
//! [`ModelFamily`] and the detected [`ProblemType`].
//!
//! # Example
//!
//! ```
//! use lex_training::{ModelFamily, TrainingConfig};
//!
//! let config = TrainingConfig::builder()
//!     .dataset_id("titanic")
//!     .target_column("Survived")
//!     .predictor_columns(["Age", "Fare", "Sex"])
//!     .model_family(ModelFamily::Classifier)
//!     .validation_split(0.25)
//!     .build()
//!     .expect("valid config");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExperimentError;

/// The type of machine learning problem, detected from the target column.
///
/// This determines which metrics and losses are used:
/// - [`Classification`](Self::Classification): accuracy, precision, recall, F1
/// - [`Regression`](Self::Regression): MSE and R²
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    /// Discrete target.
    Classification,
    /// Continuous target.
    Regression,
}

impl ProblemType {
    /// Returns the string representation stored in experiment records.
    ///
    /// ```
    /// use lex_training::ProblemType;
    ///
    /// assert_eq!(ProblemType::Classification.as_str(), "classification");
    /// assert_eq!(ProblemType::Regression.as_str(), "regression");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::Classification => "classification",
            ProblemType::Regression => "regression",
        }
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The model family declared by the user.
///
/// The neural family trains iteratively and works for both problem types.
/// The classifier and regressor families are one-shot linear fits that only
/// accept their own problem type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Feed-forward network trained for a fixed number of epochs.
    #[default]
    #[serde(alias = "neural_network")]
    Neural,
    /// One-vs-rest logistic regression.
    #[serde(alias = "classification")]
    Classifier,
    /// Ordinary least squares.
    #[serde(alias = "regression")]
    Regressor,
}

impl ModelFamily {
    /// Returns the canonical name of the family.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Neural => "neural",
            ModelFamily::Classifier => "classifier",
            ModelFamily::Regressor => "regressor",
        }
    }

    /// Whether this family can be trained on the given problem type.
    ///
    /// ```
    /// use lex_training::{ModelFamily, ProblemType};
    ///
    /// assert!(ModelFamily::Neural.compatible_with(ProblemType::Regression));
    /// assert!(!ModelFamily::Regressor.compatible_with(ProblemType::Classification));
    /// ```
    #[must_use]
    pub fn compatible_with(&self, problem_type: ProblemType) -> bool {
        match self {
            ModelFamily::Neural => true,
            ModelFamily::Classifier => problem_type == ProblemType::Classification,
            ModelFamily::Regressor => problem_type == ProblemType::Regression,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of a single training run.
///
/// Use [`TrainingConfig::builder()`] to construct a validated configuration.
/// A configuration that was deserialized directly should be checked with
/// [`validate()`](Self::validate); the pipeline does this on entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Identifier of the dataset, resolved by a [`DatasetLoader`](crate::DatasetLoader).
    pub dataset_id: String,

    /// Name of the target column.
    pub target_column: String,

    /// Names of the predictor columns, before categorical encoding.
    ///
    /// Must not contain the target column.
    pub predictor_columns: Vec<String>,

    /// Declared model family (default: neural).
    pub model_family: ModelFamily,

    /// Number of training epochs for the neural family (default: 100).
    pub epochs: u32,

    /// Optimizer learning rate for the neural family (default: 0.001).
    pub learning_rate: f64,

    /// Fraction of rows held out for validation (default: 0.2).
    ///
    /// Must be between 0.0 and 1.0 (exclusive).
    pub validation_split: f64,

    /// Number of shuffles per feature for permutation importance (default: 10).
    pub importance_repeats: u32,

    /// Seed used by the split, weight initialisation, dropout and
    /// permutation importance (default: 42).
    pub random_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset_id: String::new(),
            target_column: String::new(),
            predictor_columns: Vec::new(),
            model_family: ModelFamily::default(),
            epochs: 100,
            learning_rate: 0.001,
            validation_split: 0.2,
            importance_repeats: 10,
            random_seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Create a new builder for `TrainingConfig`.
    #[must_use]
    pub fn builder() -> TrainingConfigBuilder {
        TrainingConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Configuration`] if:
    /// - the target column is empty or listed among the predictors
    /// - no predictor columns are given
    /// - `epochs` or `importance_repeats` is 0
    /// - `learning_rate` is not a positive finite number
    /// - `validation_split` is not in `(0.0, 1.0)`
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.target_column.trim().is_empty() {
            return Err(ExperimentError::Configuration(
                "target_column must be set".to_string(),
            ));
        }

        if self.predictor_columns.contains(&self.target_column) {
            return Err(ExperimentError::Configuration(format!(
                "target column '{}' cannot be included in the predictor columns",
                self.target_column
            )));
        }

        if self.predictor_columns.is_empty() {
            return Err(ExperimentError::Configuration(
                "predictor_columns must contain at least one column".to_string(),
            ));
        }

        if self.epochs == 0 {
            return Err(ExperimentError::Configuration(
                "epochs must be at least 1".to_string(),
            ));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ExperimentError::Configuration(
                "learning_rate must be a positive number".to_string(),
            ));
        }

        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(ExperimentError::Configuration(
                "validation_split must be between 0.0 and 1.0 (exclusive)".to_string(),
            ));
        }

        if self.importance_repeats == 0 {
            return Err(ExperimentError::Configuration(
                "importance_repeats must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`TrainingConfig`].
///
/// Created via [`TrainingConfig::builder()`]. All setters return `self` to
/// allow method chaining.
#[derive(Debug, Clone, Default)]
pub struct TrainingConfigBuilder {
    config: TrainingConfig,
}

impl TrainingConfigBuilder {
    /// Set the dataset identifier.
    #[must_use]
    pub fn dataset_id(mut self, id: impl Into<String>) -> Self {
        self.config.dataset_id = id.into();
        self
    }

    /// Set the target column name.
    #[must_use]
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.config.target_column = column.into();
        self
    }

    /// Set the predictor column names.
    #[must_use]
    pub fn predictor_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.predictor_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the declared model family (default: neural).
    #[must_use]
    pub fn model_family(mut self, family: ModelFamily) -> Self {
        self.config.model_family = family;
        self
    }

    /// Set the number of epochs (default: 100).
    #[must_use]
    pub fn epochs(mut self, epochs: u32) -> Self {
        self.config.epochs = epochs;
        self
    }

    /// Set the learning rate (default: 0.001).
    #[must_use]
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.config.learning_rate = rate;
        self
    }

    /// Set the validation fraction (default: 0.2).
    #[must_use]
    pub fn validation_split(mut self, fraction: f64) -> Self {
        self.config.validation_split = fraction;
        self
    }

    /// Set the permutation importance repeat count (default: 10).
    #[must_use]
    pub fn importance_repeats(mut self, repeats: u32) -> Self {
        self.config.importance_repeats = repeats;
        self
    }

    /// Set the random seed (default: 42).
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// See [`TrainingConfig::validate()`].
    pub fn build(self) -> Result<TrainingConfig, ExperimentError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
