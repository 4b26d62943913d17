//! Shared utilities for the training pipeline.
//!
//! Helpers over polars `Series` used by the data preparer and the target
//! resolver, plus a few small numeric helpers shared by the models and the
//! metrics engine.

use ndarray::{Array1, Array2};
use polars::prelude::*;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Category of a data type for training purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtypeCategory {
    /// Integer numbers
    Integer,
    /// Floating point numbers
    Float,
    /// Boolean type
    Boolean,
    /// String or categorical type
    Text,
    /// Date, datetime or other types
    Other,
}

/// Check if a DataType is an integer type.
#[inline]
pub fn is_integer_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    is_integer_dtype(dtype) || matches!(dtype, DataType::Float32 | DataType::Float64)
}

/// Get the category of a DataType.
pub fn get_dtype_category(dtype: &DataType) -> DtypeCategory {
    if is_integer_dtype(dtype) {
        DtypeCategory::Integer
    } else if is_numeric_dtype(dtype) {
        DtypeCategory::Float
    } else if matches!(dtype, DataType::Boolean) {
        DtypeCategory::Boolean
    } else if matches!(dtype, DataType::String | DataType::Categorical(_, _)) {
        DtypeCategory::Text
    } else {
        DtypeCategory::Other
    }
}

/// Get the dtype category of a Series.
pub fn series_dtype_category(series: &Series) -> DtypeCategory {
    get_dtype_category(series.dtype())
}

// =============================================================================
// Series Conversion Utilities
// =============================================================================

/// Convert a Series to `f64` values, leaving nulls and unparsable cells as `None`.
///
/// Text cells are trimmed and parsed; booleans become 0/1; temporal types use
/// their physical representation. NaN values are reported as `None`.
pub fn series_to_f64(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let values: Vec<Option<f64>> = match series_dtype_category(series) {
        DtypeCategory::Text => {
            let as_str = series.cast(&DataType::String)?;
            as_str
                .str()?
                .into_iter()
                .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
                .collect()
        }
        DtypeCategory::Other => {
            let physical = series.to_physical_repr().cast(&DataType::Float64)?;
            physical.f64()?.into_iter().collect()
        }
        _ => {
            let floats = series.cast(&DataType::Float64)?;
            floats.f64()?.into_iter().collect()
        }
    };

    Ok(values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

/// Mean of the present values, or `None` if there are none.
pub fn mean_of_present(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Replace missing values with `fill`.
pub fn fill_missing(values: &[Option<f64>], fill: f64) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(fill)).collect()
}

/// Convert a text-like Series to owned strings, keeping nulls.
pub fn series_to_strings(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let as_str = series.cast(&DataType::String)?;
    Ok(as_str
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Sorted distinct non-null strings of a Series.
pub fn sorted_categories(values: &[Option<String>]) -> Vec<String> {
    let mut categories: Vec<String> = values.iter().flatten().cloned().collect();
    categories.sort();
    categories.dedup();
    categories
}

/// Format a numeric class label, printing whole numbers without a fraction.
pub fn format_label(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

// =============================================================================
// Array Utilities
// =============================================================================

/// Build a row-major matrix from column vectors of equal length.
pub fn columns_to_matrix(columns: &[Vec<f64>], n_rows: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_rows, columns.len()), |(row, col)| columns[col][row])
}

/// Gather the given rows of a matrix, in order.
pub fn select_rows(x: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((indices.len(), x.ncols()), |(row, col)| {
        x[[indices[row], col]]
    })
}

/// Gather the given entries of a vector, in order.
pub fn select_values(y: &Array1<f64>, indices: &[usize]) -> Array1<f64> {
    indices.iter().map(|&i| y[i]).collect()
}

/// Index of the largest value in a slice (first on ties).
pub fn argmax<'a>(values: impl IntoIterator<Item = &'a f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.into_iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// =============================================================================
// Tests
// =============================================================================
