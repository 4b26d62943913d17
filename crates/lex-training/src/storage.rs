//! Dataset loaders and experiment stores.
//!
//! - [`CsvDatasetLoader`] reads `<root>/<dataset_id>.csv` with polars.
//! - [`JsonFileStore`] writes one pretty-printed JSON file per experiment.
//! - [`InMemoryStore`] keeps records in memory, mainly for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use polars::io::csv::read::{CsvParseOptions, CsvReadOptions};
use polars::prelude::*;
use tracing::debug;

use crate::error::{ExperimentError, Result, ResultExt, UpstreamDataKind};
use crate::service::{DatasetLoader, ExperimentStore};
use crate::types::Experiment;

// =============================================================================
// CSV Loader
// =============================================================================

/// Loads datasets from CSV files under a root directory.
#[derive(Debug, Clone)]
pub struct CsvDatasetLoader {
    root: PathBuf,
}

impl CsvDatasetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the CSV file backing `dataset_id`.
    pub fn dataset_path(&self, dataset_id: &str) -> PathBuf {
        self.root.join(format!("{dataset_id}.csv"))
    }
}

impl DatasetLoader for CsvDatasetLoader {
    fn load(&self, dataset_id: &str) -> Result<DataFrame> {
        if dataset_id.is_empty() {
            return Err(UpstreamDataKind::NotFound(dataset_id.to_string()).into());
        }
        let path = self.dataset_path(dataset_id);
        if !path.is_file() {
            return Err(UpstreamDataKind::NotFound(dataset_id.to_string()).into());
        }

        debug!(path = %path.display(), "Reading CSV dataset");
        let df = CsvReadOptions::default()
            .with_infer_schema_length(Some(100))
            .with_has_header(true)
            .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
            .try_into_reader_with_file_path(Some(path.clone()))
            .and_then(|reader| reader.finish())
            .map_err(|e| {
                UpstreamDataKind::Unreachable(format!("{}: {e}", path.display()))
            })?;

        if df.height() == 0 || df.width() == 0 {
            return Err(UpstreamDataKind::Empty(dataset_id.to_string()).into());
        }
        Ok(df)
    }
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Stores each experiment as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for experiment `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load a previously persisted experiment.
    pub fn load(&self, id: &str) -> Result<Experiment> {
        let path = self.record_path(id);
        read_record(&path).context(format!("Failed to load experiment from {}", path.display()))
    }
}

fn read_record(path: &Path) -> Result<Experiment> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn write_record(dir: &Path, path: &Path, experiment: &Experiment) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(experiment)?;
    // Write to a sibling file first so readers never see a partial record.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl ExperimentStore for JsonFileStore {
    fn persist(&self, experiment: &Experiment) -> Result<()> {
        let path = self.record_path(&experiment.id);
        write_record(&self.dir, &path, experiment)
            .context(format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Wrote experiment record");
        Ok(())
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Keeps experiments in memory.
///
/// [`set_failing`](Self::set_failing) makes every subsequent `persist` call
/// fail, which lets callers exercise persistence error paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    experiments: Mutex<Vec<Experiment>>,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of the stored experiments, in persist order.
    pub fn experiments(&self) -> Vec<Experiment> {
        self.experiments.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Experiment> {
        self.experiments.lock().iter().find(|e| e.id == id).cloned()
    }
}

impl ExperimentStore for InMemoryStore {
    fn persist(&self, experiment: &Experiment) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExperimentError::Persistence(
                "in-memory store is set to fail".to_string(),
            ));
        }
        self.experiments.lock().push(experiment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ExperimentAssembler;
    use crate::config::TrainingConfig;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lex-training-{name}-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record() -> Experiment {
        ExperimentAssembler.failed(
            &TrainingConfig::default(),
            None,
            &ExperimentError::Computation("boom".to_string()),
        )
    }

    // -------------------------------------------------------------------------
    // CsvDatasetLoader Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_csv_loader_reads_file() {
        let dir = scratch_dir("csv");
        std::fs::write(dir.join("iris.csv"), "a,b,label\n1,2.5,x\n3,4.5,y\n").unwrap();

        let df = CsvDatasetLoader::new(&dir).load("iris").unwrap();
        assert_eq!(df.shape(), (2, 3));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_csv_loader_missing_file() {
        let dir = scratch_dir("missing");
        let err = CsvDatasetLoader::new(&dir).load("nope").unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::UpstreamData(UpstreamDataKind::NotFound(ref id)) if id == "nope"
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_csv_loader_header_only_is_empty() {
        let dir = scratch_dir("empty");
        std::fs::write(dir.join("blank.csv"), "a,b\n").unwrap();

        let err = CsvDatasetLoader::new(&dir).load("blank").unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::UpstreamData(UpstreamDataKind::Empty(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    // -------------------------------------------------------------------------
    // Store Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_json_store_round_trip() {
        let dir = scratch_dir("store");
        let store = JsonFileStore::new(dir.join("experiments"));
        let experiment = record();

        store.persist(&experiment).unwrap();
        assert!(store.record_path(&experiment.id).is_file());
        assert_eq!(store.load(&experiment.id).unwrap(), experiment);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_json_store_load_unknown_id() {
        let dir = scratch_dir("unknown");
        let err = JsonFileStore::new(&dir).load("missing").unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_in_memory_store_failure_switch() {
        let store = InMemoryStore::new();
        store.persist(&record()).unwrap();
        store.set_failing(true);

        assert!(store.persist(&record()).is_err());
        assert_eq!(store.experiments().len(), 1);
    }
}
