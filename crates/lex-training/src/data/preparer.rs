//! Data preparation: imputation, categorical encoding and predictor extraction.
//!
//! The preparer never mutates the input table. Numeric columns are filled with
//! their mean and every text column other than the target is replaced by
//! indicator columns named `{column}_{category}`, dropping the first sorted
//! category. Only configured predictors that exist after this encoding are
//! kept, so a text predictor is selected through its indicator names, never
//! its own. Everything else is coerced to `f64`, with unparsable cells
//! becoming 0.

use ndarray::Array2;
use polars::prelude::*;
use tracing::{debug, warn};

use crate::config::TrainingConfig;
use crate::error::{ExperimentError, Result, ResultExt, UpstreamDataKind};
use crate::utils::{
    DtypeCategory, columns_to_matrix, fill_missing, mean_of_present, series_dtype_category,
    series_to_f64, series_to_strings, sorted_categories,
};

/// Predictor matrix and raw target extracted from a table.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    /// Numeric predictor matrix, one row per table row.
    pub features: Array2<f64>,
    /// Column names of `features`, in order.
    pub feature_names: Vec<String>,
    /// Target column exactly as it appeared in the table.
    pub target: Series,
}

impl PreparedDataset {
    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }
}

/// Predictor columns selected so far, in configured order.
#[derive(Debug, Default)]
struct EncodedColumns {
    names: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl EncodedColumns {
    fn push(&mut self, name: String, values: Vec<f64>) {
        self.names.push(name);
        self.values.push(values);
    }
}

/// Prepares raw tables for training.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataPreparer;

impl DataPreparer {
    /// Extract the predictor matrix and target from `df`.
    ///
    /// # Errors
    ///
    /// - [`ExperimentError::Configuration`] if the target is listed among the
    ///   predictors, the target column is missing, or no predictor survives
    /// - [`ExperimentError::UpstreamData`] if the table has no rows
    pub fn prepare(&self, df: &DataFrame, config: &TrainingConfig) -> Result<PreparedDataset> {
        if config.predictor_columns.contains(&config.target_column) {
            return Err(ExperimentError::Configuration(format!(
                "target column '{}' cannot be included in the predictor columns",
                config.target_column
            )));
        }

        if df.height() == 0 {
            return Err(UpstreamDataKind::Empty(config.dataset_id.clone()).into());
        }

        let target = df
            .column(&config.target_column)
            .map_err(|_| {
                ExperimentError::Configuration(format!(
                    "target column '{}' not found in dataset",
                    config.target_column
                ))
            })?
            .as_materialized_series()
            .clone();

        let mut encoded = EncodedColumns::default();
        for name in &config.predictor_columns {
            let values = select_predictor(df, name, &config.target_column)
                .context(format!("Failed to encode predictor '{name}'"))?;
            match values {
                Selected::Column(values) => encoded.push(name.clone(), values),
                Selected::ReplacedByIndicators => warn!(
                    column = %name,
                    "Text predictor is replaced by its indicator columns, skipping"
                ),
                Selected::Absent => warn!(column = %name, "Predictor column not present, skipping"),
            }
        }

        if encoded.names.is_empty() {
            return Err(ExperimentError::Configuration(
                "none of the predictor columns are present in the dataset".to_string(),
            ));
        }

        debug!(
            rows = df.height(),
            features = encoded.names.len(),
            "Prepared predictor matrix"
        );

        Ok(PreparedDataset {
            features: columns_to_matrix(&encoded.values, df.height()),
            feature_names: encoded.names,
            target,
        })
    }
}

/// Outcome of looking up one configured predictor in the encoded table.
enum Selected {
    Column(Vec<f64>),
    ReplacedByIndicators,
    Absent,
}

fn select_predictor(df: &DataFrame, name: &str, target: &str) -> PolarsResult<Selected> {
    if let Ok(column) = df.column(name) {
        let series = column.as_materialized_series();
        let values = match series_dtype_category(series) {
            DtypeCategory::Text => return Ok(Selected::ReplacedByIndicators),
            DtypeCategory::Integer | DtypeCategory::Float => {
                let values = series_to_f64(series)?;
                let mean = mean_of_present(&values).unwrap_or(0.0);
                fill_missing(&values, mean)
            }
            DtypeCategory::Boolean | DtypeCategory::Other => {
                fill_missing(&series_to_f64(series)?, 0.0)
            }
        };
        return Ok(Selected::Column(values));
    }

    match indicator_column(df, name, target)? {
        Some(values) => Ok(Selected::Column(values)),
        None => Ok(Selected::Absent),
    }
}

/// Build the indicator column `name` if it is `{column}_{category}` for a
/// text column and a category that survives dropping the first one.
fn indicator_column(df: &DataFrame, name: &str, target: &str) -> PolarsResult<Option<Vec<f64>>> {
    for column in df.get_columns() {
        let source = column.name().as_str();
        if source == target {
            continue;
        }
        let Some(category) = name
            .strip_prefix(source)
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            continue;
        };
        let series = column.as_materialized_series();
        if series_dtype_category(series) != DtypeCategory::Text {
            continue;
        }

        let values = series_to_strings(series)?;
        let categories = sorted_categories(&values);
        if categories.iter().skip(1).any(|c| c == category) {
            let indicator = values
                .iter()
                .map(|v| match v {
                    Some(v) if v == category => 1.0,
                    _ => 0.0,
                })
                .collect();
            return Ok(Some(indicator));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(predictors: &[&str]) -> TrainingConfig {
        TrainingConfig {
            target_column: "y".to_string(),
            predictor_columns: predictors.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    // =========================================================================
    // Imputation
    // =========================================================================

    #[test]
    fn test_numeric_nulls_filled_with_mean() {
        let df = df![
            "a" => [Some(1.0), None, Some(3.0)],
            "y" => [0, 1, 0],
        ]
        .unwrap();

        let prepared = DataPreparer.prepare(&df, &config(&["a"])).unwrap();
        assert_eq!(prepared.features.column(0).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_all_null_numeric_column_becomes_zero() {
        let df = df![
            "a" => [None::<f64>, None, None],
            "y" => [0, 1, 0],
        ]
        .unwrap();

        let prepared = DataPreparer.prepare(&df, &config(&["a"])).unwrap();
        assert_eq!(prepared.features.column(0).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    #[test]
    fn test_one_hot_drops_first_category() {
        let df = df![
            "color" => ["red", "blue", "green", "blue"],
            "y" => [1.0, 2.0, 3.0, 4.0],
        ]
        .unwrap();

        let prepared = DataPreparer
            .prepare(&df, &config(&["color_red", "color_green"]))
            .unwrap();
        assert_eq!(prepared.feature_names, vec!["color_red", "color_green"]);
        assert_eq!(prepared.features.column(0).to_vec(), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(prepared.features.column(1).to_vec(), vec![0.0, 0.0, 1.0, 0.0]);

        // The first sorted category has no indicator column.
        let err = DataPreparer.prepare(&df, &config(&["color_blue"])).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_text_predictor_is_replaced_by_indicators() {
        let df = df![
            "x1" => [1.0, 2.0, 3.0],
            "color" => ["red", "blue", "green"],
            "y" => [1.0, 2.0, 3.0],
        ]
        .unwrap();

        let prepared = DataPreparer.prepare(&df, &config(&["x1", "color"])).unwrap();
        assert_eq!(prepared.feature_names, vec!["x1"]);
        assert_eq!(prepared.features.ncols(), 1);
    }

    #[test]
    fn test_missing_text_cells_encode_as_zero_row() {
        let df = df![
            "c" => [Some("a"), None, Some("b")],
            "y" => [1.0, 2.0, 3.0],
        ]
        .unwrap();

        let prepared = DataPreparer.prepare(&df, &config(&["c_b"])).unwrap();
        assert_eq!(prepared.feature_names, vec!["c_b"]);
        assert_eq!(prepared.features.column(0).to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_boolean_predictor_coerced() {
        let df = df![
            "flag" => [Some(true), None, Some(false)],
            "y" => [1.0, 2.0, 3.0],
        ]
        .unwrap();

        let prepared = DataPreparer.prepare(&df, &config(&["flag"])).unwrap();
        assert_eq!(prepared.features.column(0).to_vec(), vec![1.0, 0.0, 0.0]);
    }

    // =========================================================================
    // Selection and validation
    // =========================================================================

    #[test]
    fn test_absent_predictors_are_skipped() {
        let df = df![
            "a" => [1.0, 2.0],
            "y" => [0, 1],
        ]
        .unwrap();

        let prepared = DataPreparer.prepare(&df, &config(&["a", "ghost"])).unwrap();
        assert_eq!(prepared.feature_names, vec!["a"]);
        assert_eq!(prepared.target.len(), 2);
    }

    #[test]
    fn test_target_in_predictors_rejected() {
        let df = df!["a" => [1.0], "y" => [0]].unwrap();
        let err = DataPreparer.prepare(&df, &config(&["a", "y"])).unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
    }

    #[test]
    fn test_missing_target_rejected() {
        let df = df!["a" => [1.0]].unwrap();
        let err = DataPreparer.prepare(&df, &config(&["a"])).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_no_surviving_predictors_rejected() {
        let df = df!["a" => [1.0], "y" => [0]].unwrap();
        let err = DataPreparer.prepare(&df, &config(&["ghost"])).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_empty_table_rejected() {
        let df = df!["a" => Vec::<f64>::new(), "y" => Vec::<i32>::new()].unwrap();
        let err = DataPreparer.prepare(&df, &config(&["a"])).unwrap_err();
        assert_eq!(err.error_code(), "UPSTREAM_DATA_ERROR");
    }
}
