//! Error types for the lex-training crate.
//!
//! This module defines [`ExperimentError`], the error type returned by every
//! fallible operation in the crate, together with the [`Result`] alias and the
//! [`ResultExt`] extension trait for attaching context.
//!
//! # Error classes
//!
//! - **Eager** errors ([`Configuration`](ExperimentError::Configuration),
//!   [`TypeConflict`](ExperimentError::TypeConflict),
//!   [`InsufficientClasses`](ExperimentError::InsufficientClasses)) are raised
//!   before any model is fit.
//! - [`UpstreamData`](ExperimentError::UpstreamData) comes from the dataset
//!   loader.
//! - [`Computation`](ExperimentError::Computation) covers unexpected failures
//!   inside the training and metrics stages.
//! - [`Persistence`](ExperimentError::Persistence) is only produced by
//!   experiment stores.
//!
//! Errors are serializable as `{code, message}` so a caller can forward them
//! to a frontend unchanged.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// Reasons the dataset loader could not produce a table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UpstreamDataKind {
    /// No dataset is registered under the identifier.
    #[error("dataset '{0}' not found")]
    NotFound(String),

    /// The dataset exists but has no rows or no columns.
    #[error("dataset '{0}' is empty")]
    Empty(String),

    /// The dataset could not be read.
    #[error("dataset unreachable: {0}")]
    Unreachable(String),
}

/// The main error type for training runs.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExperimentError {
    /// The training configuration is invalid.
    ///
    /// Raised when the target column is also listed as a predictor, or when a
    /// hyperparameter is out of range.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The declared model family does not match the detected problem type.
    #[error(
        "Type conflict: declared model family '{declared}' but the target column looks like {detected}"
    )]
    TypeConflict {
        /// The declared model family.
        declared: String,
        /// The detected problem type.
        detected: String,
    },

    /// A classification target has fewer than two classes.
    #[error("Target column '{column}' must have at least 2 classes, found {found}")]
    InsufficientClasses {
        /// The target column name.
        column: String,
        /// Number of distinct classes found.
        found: usize,
    },

    /// The dataset could not be obtained from the loader.
    #[error("Upstream data error: {0}")]
    UpstreamData(#[from] UpstreamDataKind),

    /// A training or metrics stage failed unexpectedly.
    #[error("Computation failed: {0}")]
    Computation(String),

    /// The experiment record could not be stored.
    #[error("Failed to persist experiment: {0}")]
    Persistence(String),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error with added context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ExperimentError>,
    },
}

impl ExperimentError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ExperimentError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get error code for frontend handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::TypeConflict { .. } => "TYPE_CONFLICT",
            Self::InsufficientClasses { .. } => "INSUFFICIENT_CLASSES",
            Self::UpstreamData(_) => "UPSTREAM_DATA_ERROR",
            Self::Computation(_) => "COMPUTATION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

}

/// Serialize implementation for IPC compatibility.
///
/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for ExperimentError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ExperimentError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ExperimentError::Polars(e).with_context(context))
    }
}
