//! Experiment service.
//!
//! [`ExperimentService`] connects a [`Pipeline`] to its collaborators: a
//! [`DatasetLoader`] that produces the raw table and an [`ExperimentStore`]
//! that receives the finished record.
//!
//! # Failure handling
//!
//! | Failure | Record persisted | Returned |
//! |---|---|---|
//! | invalid configuration | none | the configuration error |
//! | loading or any pipeline stage | error record, best-effort | the original error |
//! | persisting a completed record | none | `Persistence` error |

use polars::prelude::DataFrame;
use tracing::{error, info, warn};

use crate::assembler::ExperimentAssembler;
use crate::config::TrainingConfig;
use crate::error::{ExperimentError, Result};
use crate::pipeline::{Pipeline, RunOutcome};
use crate::types::Experiment;

/// Produces the raw table for a dataset identifier.
pub trait DatasetLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ExperimentError::UpstreamData`] if the dataset is missing,
    /// empty, or cannot be read.
    fn load(&self, dataset_id: &str) -> Result<DataFrame>;
}

/// Receives finished experiment records.
pub trait ExperimentStore: Send + Sync {
    fn persist(&self, experiment: &Experiment) -> Result<()>;
}

/// Runs training requests end to end.
#[derive(Debug)]
pub struct ExperimentService<L, S> {
    loader: L,
    store: S,
    pipeline: Pipeline,
}

impl<L: DatasetLoader, S: ExperimentStore> ExperimentService<L, S> {
    /// Create a service with a default pipeline.
    pub fn new(loader: L, store: S) -> Self {
        Self::with_pipeline(loader, store, Pipeline::default())
    }

    /// Create a service around a configured pipeline.
    pub fn with_pipeline(loader: L, store: S, pipeline: Pipeline) -> Self {
        Self {
            loader,
            store,
            pipeline,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Train one experiment and persist its record.
    ///
    /// # Errors
    ///
    /// Returns the configuration error without persisting anything if
    /// `config` is invalid. Otherwise a failed run persists its error record
    /// (best-effort) and returns the original error. A completed run whose
    /// record cannot be persisted returns [`ExperimentError::Persistence`].
    pub fn train(&self, config: &TrainingConfig) -> Result<Experiment> {
        config.validate()?;

        let df = match self.loader.load(&config.dataset_id) {
            Ok(df) => df,
            Err(err) => {
                error!(dataset = %config.dataset_id, error = %err, "Failed to load dataset");
                let record = ExperimentAssembler.failed(config, None, &err);
                self.persist_failure(&record);
                return Err(err);
            }
        };
        info!(
            dataset = %config.dataset_id,
            rows = df.height(),
            columns = df.width(),
            "Loaded dataset"
        );

        match self.pipeline.execute(&df, config) {
            RunOutcome::Completed(experiment) => {
                self.store.persist(&experiment).map_err(|err| {
                    ExperimentError::Persistence(format!(
                        "experiment '{}': {err}",
                        experiment.id
                    ))
                })?;
                info!(id = %experiment.id, name = %experiment.name, "Persisted experiment");
                Ok(experiment)
            }
            RunOutcome::Failed { record, error } => {
                self.persist_failure(&record);
                Err(error)
            }
        }
    }

    fn persist_failure(&self, record: &Experiment) {
        match self.store.persist(record) {
            Ok(()) => info!(id = %record.id, "Persisted error record"),
            Err(err) => warn!(id = %record.id, error = %err, "Failed to persist error record"),
        }
    }
}
