//! Problem-type resolution and target encoding.
//!
//! A target is treated as classification when it is text, categorical, or an
//! integer column with at most [`MAX_INTEGER_CLASSES`] distinct values.
//! Everything else, booleans included, is regression.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array1;
use polars::prelude::*;
use tracing::{debug, info};

use crate::config::{ModelFamily, ProblemType};
use crate::error::{ExperimentError, Result, ResultExt};
use crate::utils::{
    DtypeCategory, fill_missing, format_label, mean_of_present, series_dtype_category,
    series_to_f64, series_to_strings,
};

/// Integer targets with at most this many distinct values are classification.
pub const MAX_INTEGER_CLASSES: usize = 30;

/// Target vector ready for training.
///
/// For classification `values` holds class indices `0..classes.len()` as `f64`
/// and `classes` holds the original labels in index order. For regression
/// `classes` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTarget {
    pub problem_type: ProblemType,
    pub values: Array1<f64>,
    pub classes: Vec<String>,
}

impl EncodedTarget {
    /// Number of classes, 0 for regression.
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Class key that sorts integers numerically and text lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ClassKey {
    Integer(i64),
    Text(String),
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassKey::Integer(v) => write!(f, "{}", format_label(*v as f64)),
            ClassKey::Text(s) => f.write_str(s),
        }
    }
}

/// Detect the problem type from the target's dtype and cardinality.
pub fn detect_problem_type(target: &Series) -> Result<ProblemType> {
    let problem_type = match series_dtype_category(target) {
        DtypeCategory::Text => ProblemType::Classification,
        DtypeCategory::Integer => {
            let distinct = target
                .drop_nulls()
                .n_unique()
                .context("Failed to count target classes")?;
            if distinct <= MAX_INTEGER_CLASSES {
                ProblemType::Classification
            } else {
                ProblemType::Regression
            }
        }
        DtypeCategory::Float | DtypeCategory::Boolean | DtypeCategory::Other => {
            ProblemType::Regression
        }
    };
    Ok(problem_type)
}

/// Check the detected problem type against the declared family and encode
/// the target.
///
/// # Errors
///
/// - [`ExperimentError::TypeConflict`] if `family` cannot train
///   `problem_type`; raised before any encoding
/// - [`ExperimentError::InsufficientClasses`] if a classification target has
///   fewer than two distinct values
pub fn resolve_target(
    target: &Series,
    problem_type: ProblemType,
    family: ModelFamily,
) -> Result<EncodedTarget> {
    info!(problem_type = %problem_type, family = %family, "Resolving target");

    if !family.compatible_with(problem_type) {
        return Err(ExperimentError::TypeConflict {
            declared: family.to_string(),
            detected: problem_type.to_string(),
        });
    }

    match problem_type {
        ProblemType::Classification => encode_classes(target),
        ProblemType::Regression => encode_values(target),
    }
}

fn class_keys(target: &Series) -> Result<Vec<Option<ClassKey>>> {
    let keys = match series_dtype_category(target) {
        DtypeCategory::Integer => {
            let ints = target.cast(&DataType::Int64)?;
            ints.i64()?
                .into_iter()
                .map(|v| v.map(ClassKey::Integer))
                .collect()
        }
        _ => series_to_strings(target)?
            .into_iter()
            .map(|v| v.map(ClassKey::Text))
            .collect(),
    };
    Ok(keys)
}

fn encode_classes(target: &Series) -> Result<EncodedTarget> {
    let column = target.name().to_string();
    let keys = class_keys(target)?;

    let mut counts: BTreeMap<ClassKey, usize> = BTreeMap::new();
    for key in keys.iter().flatten() {
        *counts.entry(key.clone()).or_insert(0) += 1;
    }

    if counts.len() < 2 {
        return Err(ExperimentError::InsufficientClasses {
            column,
            found: counts.len(),
        });
    }

    // Ties resolve to the smallest key since the map iterates in order.
    let mut mode: Option<(&ClassKey, usize)> = None;
    for (key, &count) in &counts {
        if mode.is_none_or(|(_, best)| count > best) {
            mode = Some((key, count));
        }
    }
    let mode_index = mode
        .and_then(|(key, _)| counts.keys().position(|k| k == key))
        .unwrap_or(0);

    let index: BTreeMap<&ClassKey, usize> = counts.keys().zip(0..).collect();
    let values: Array1<f64> = keys
        .iter()
        .map(|key| {
            key.as_ref()
                .and_then(|k| index.get(k).copied())
                .unwrap_or(mode_index) as f64
        })
        .collect();

    let classes: Vec<String> = counts.keys().map(ToString::to_string).collect();
    debug!(column = %column, classes = classes.len(), "Label-encoded target");

    Ok(EncodedTarget {
        problem_type: ProblemType::Classification,
        values,
        classes,
    })
}

fn encode_values(target: &Series) -> Result<EncodedTarget> {
    let values = series_to_f64(target)?;
    let mean = mean_of_present(&values).ok_or_else(|| {
        ExperimentError::Computation(format!(
            "target column '{}' has no numeric values",
            target.name()
        ))
    })?;

    Ok(EncodedTarget {
        problem_type: ProblemType::Regression,
        values: Array1::from(fill_missing(&values, mean)),
        classes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detect_and_resolve(target: &Series, family: ModelFamily) -> Result<EncodedTarget> {
        resolve_target(target, detect_problem_type(target)?, family)
    }

    // =========================================================================
    // Detection
    // =========================================================================

    #[test]
    fn test_text_target_is_classification() {
        let s = Series::new("y".into(), &["a", "b", "a"]);
        assert_eq!(detect_problem_type(&s).unwrap(), ProblemType::Classification);
    }

    #[test]
    fn test_integer_cardinality_threshold() {
        let few = Series::new("y".into(), (0..30).collect::<Vec<i64>>());
        assert_eq!(detect_problem_type(&few).unwrap(), ProblemType::Classification);

        let many = Series::new("y".into(), (0..31).collect::<Vec<i64>>());
        assert_eq!(detect_problem_type(&many).unwrap(), ProblemType::Regression);
    }

    #[test]
    fn test_float_target_is_regression() {
        let s = Series::new("y".into(), &[0.0, 1.0, 0.0]);
        assert_eq!(detect_problem_type(&s).unwrap(), ProblemType::Regression);
    }

    #[test]
    fn test_boolean_target_is_regression() {
        let s = Series::new("y".into(), &[Some(true), None, Some(false), Some(true)]);
        assert_eq!(detect_problem_type(&s).unwrap(), ProblemType::Regression);

        let encoded = detect_and_resolve(&s, ModelFamily::Regressor).unwrap();
        let mean = 2.0 / 3.0;
        assert_eq!(encoded.values.to_vec(), vec![1.0, mean, 0.0, 1.0]);
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    #[test]
    fn test_regressor_on_text_target_conflicts() {
        let s = Series::new("y".into(), &["yes", "no"]);
        let err = detect_and_resolve(&s, ModelFamily::Regressor).unwrap_err();
        match err {
            ExperimentError::TypeConflict { declared, detected } => {
                assert_eq!(declared, "regressor");
                assert_eq!(detected, "classification");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_neural_accepts_both_types() {
        let text = Series::new("y".into(), &["yes", "no"]);
        let floats = Series::new("y".into(), &[1.5, 2.5]);
        assert!(detect_and_resolve(&text, ModelFamily::Neural).is_ok());
        assert!(detect_and_resolve(&floats, ModelFamily::Neural).is_ok());
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    #[test]
    fn test_label_encoding_sorted_with_mode_fill() {
        let s = Series::new("y".into(), &[Some("cat"), Some("dog"), None, Some("cat")]);
        let encoded = detect_and_resolve(&s, ModelFamily::Classifier).unwrap();
        assert_eq!(encoded.classes, vec!["cat", "dog"]);
        assert_eq!(encoded.values.to_vec(), vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_integer_labels_sort_numerically() {
        let s = Series::new("y".into(), &[10i64, 2, 10, 2, 3]);
        let encoded = detect_and_resolve(&s, ModelFamily::Classifier).unwrap();
        assert_eq!(encoded.classes, vec!["2", "3", "10"]);
        assert_eq!(encoded.values.to_vec(), vec![2.0, 0.0, 2.0, 0.0, 1.0]);
        assert_eq!(encoded.n_classes(), 3);
    }

    #[test]
    fn test_mode_tie_resolves_to_smallest_label() {
        let s = Series::new("y".into(), &[Some("b"), Some("a"), None]);
        let encoded = detect_and_resolve(&s, ModelFamily::Classifier).unwrap();
        assert_eq!(encoded.values.to_vec(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_single_class_is_insufficient() {
        let s = Series::new("y".into(), &[Some("only"), None, Some("only")]);
        let err = detect_and_resolve(&s, ModelFamily::Classifier).unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::InsufficientClasses { found: 1, .. }
        ));
    }

    #[test]
    fn test_regression_fills_with_mean() {
        let s = Series::new("y".into(), &[Some(1.0), None, Some(5.0)]);
        let encoded = detect_and_resolve(&s, ModelFamily::Regressor).unwrap();
        assert_eq!(encoded.values.to_vec(), vec![1.0, 3.0, 5.0]);
        assert!(encoded.classes.is_empty());
    }
}
