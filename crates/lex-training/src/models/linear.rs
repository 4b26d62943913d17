//! One-shot linear models.
//!
//! - [`LinearRegressor`]: ordinary least squares via the normal equations
//! - [`LinearClassifier`]: one-vs-rest logistic regression fit by batch
//!   gradient descent

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use super::{EpochObserver, Model, ModelTrainer, TrainedModel, TrainingData, TrainingOutcome, one_shot_outcome};
use crate::config::ProblemType;
use crate::error::{ExperimentError, Result};
use crate::utils::{argmax, sigmoid};

// =============================================================================
// Linear algebra
// =============================================================================

/// Solve the symmetric positive-definite system `a * x = b` by Cholesky.
///
/// A non-positive pivot triggers one retry with a small ridge added to the
/// diagonal.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky_solve_inner(a, b).or_else(|| {
        let n = a.nrows();
        let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
        let ridge = if ridge > 0.0 { ridge } else { 1e-8 };
        let mut regularized = a.clone();
        for k in 0..n {
            regularized[[k, k]] += ridge;
        }
        cholesky_solve_inner(&regularized, b)
    })
}

fn cholesky_solve_inner(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Gauss-Jordan inverse with partial pivoting, used when Cholesky fails.
fn matrix_inverse(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return None;
    }

    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| aug[[a, col]].abs().total_cmp(&aug[[b, col]].abs()))
            .unwrap_or(col);
        if pivot_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        if pivot.abs() < 1e-10 {
            return None;
        }
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }

        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                for j in 0..2 * n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}

// =============================================================================
// Linear regressor
// =============================================================================

/// Ordinary least squares with an intercept.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegressor {
    coefficients: Array1<f64>,
    intercept: f64,
}

impl LinearRegressor {
    /// Build a regressor from known parameters.
    pub fn from_parts(coefficients: Array1<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    /// Fit by solving the centered normal equations.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Computation`] on shape mismatch or a
    /// singular system.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(ExperimentError::Computation(format!(
                "expected {} target values, got {}",
                x.nrows(),
                y.len()
            )));
        }
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| ExperimentError::Computation("cannot fit on zero rows".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);

        let x_centered = x - &x_mean;
        let y_centered = y - y_mean;

        let xtx = x_centered.t().dot(&x_centered);
        let xty = x_centered.t().dot(&y_centered);

        let coefficients = match cholesky_solve(&xtx, &xty) {
            Some(c) => c,
            None => matrix_inverse(&xtx)
                .map(|inv| inv.dot(&xty))
                .ok_or_else(|| {
                    ExperimentError::Computation(
                        "matrix is singular, cannot solve least squares".to_string(),
                    )
                })?,
        };

        let intercept = y_mean - coefficients.dot(&x_mean);
        Ok(Self {
            coefficients,
            intercept,
        })
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Model for LinearRegressor {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(x, self.coefficients.len())?;
        Ok(x.dot(&self.coefficients) + self.intercept)
    }

    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        Ok(None)
    }
}

// =============================================================================
// Linear classifier
// =============================================================================

/// Binary logistic model for one class against the rest.
#[derive(Debug, Clone, PartialEq)]
struct BinaryLogistic {
    weights: Array1<f64>,
    bias: f64,
}

impl BinaryLogistic {
    fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &LinearClassifierTrainer) -> Self {
        let n = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        // L2 strength equivalent to an inverse regularization of 1 per sample set.
        let alpha = params.l2 / n;

        for _ in 0..params.max_iter {
            let linear = x.dot(&weights) + bias;
            let errors = linear.mapv(sigmoid) - y;
            let dw = x.t().dot(&errors) / n + alpha * &weights;
            let db = errors.mean().unwrap_or(0.0);

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < params.tol {
                break;
            }
            weights = weights - params.learning_rate * dw;
            bias -= params.learning_rate * db;
        }
        Self { weights, bias }
    }

    fn probability(&self, x: &Array2<f64>) -> Array1<f64> {
        (x.dot(&self.weights) + self.bias).mapv(sigmoid)
    }
}

/// One-vs-rest logistic regression.
///
/// Binary targets use a single model for class 1. With more classes each
/// class gets its own model and per-row probabilities are normalized to sum
/// to one.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearClassifier {
    n_classes: usize,
    n_features: usize,
    estimators: Vec<BinaryLogistic>,
}

impl LinearClassifier {
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn fit(x: &Array2<f64>, y: &Array1<f64>, n_classes: usize, params: &LinearClassifierTrainer) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(ExperimentError::Computation(format!(
                "expected {} target values, got {}",
                x.nrows(),
                y.len()
            )));
        }
        if n_classes < 2 {
            return Err(ExperimentError::Computation(format!(
                "classifier needs at least 2 classes, got {n_classes}"
            )));
        }

        let estimators = if n_classes == 2 {
            vec![BinaryLogistic::fit(x, y, params)]
        } else {
            (0..n_classes)
                .map(|class| {
                    let target = y.mapv(|v| if v as usize == class { 1.0 } else { 0.0 });
                    BinaryLogistic::fit(x, &target, params)
                })
                .collect()
        };

        Ok(Self {
            n_classes,
            n_features: x.ncols(),
            estimators,
        })
    }

    fn probabilities(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_width(x, self.n_features)?;
        let mut proba = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        if let [binary] = self.estimators.as_slice() {
            let p = binary.probability(x);
            proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
            proba.column_mut(1).assign(&p);
        } else {
            for (class, estimator) in self.estimators.iter().enumerate() {
                proba.column_mut(class).assign(&estimator.probability(x));
            }
            for mut row in proba.rows_mut() {
                let sum = row.sum();
                if sum > 0.0 {
                    row /= sum;
                } else {
                    row.fill(1.0 / self.n_classes as f64);
                }
            }
        }
        Ok(proba)
    }
}

impl Model for LinearClassifier {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.probabilities(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| argmax(row.iter()) as f64)
            .collect())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        self.probabilities(x).map(Some)
    }
}

fn check_width(x: &Array2<f64>, expected: usize) -> Result<()> {
    if x.ncols() != expected {
        return Err(ExperimentError::Computation(format!(
            "model expects {expected} features, got {}",
            x.ncols()
        )));
    }
    Ok(())
}

// =============================================================================
// Trainers
// =============================================================================

/// Trains a [`LinearRegressor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearRegressorTrainer;

impl ModelTrainer for LinearRegressorTrainer {
    fn name(&self) -> &'static str {
        "linear_regressor"
    }

    fn fit(&self, data: &TrainingData<'_>, _on_epoch: &mut EpochObserver<'_>) -> Result<TrainingOutcome> {
        if data.problem_type != ProblemType::Regression {
            return Err(ExperimentError::Computation(
                "linear regressor requires a regression target".to_string(),
            ));
        }
        let model = LinearRegressor::fit(data.x_train, data.y_train)?;
        debug!(intercept = model.intercept(), "Fitted linear regressor");
        one_shot_outcome(TrainedModel::Regressor(model), data)
    }
}

/// Trains a [`LinearClassifier`].
#[derive(Debug, Clone, Copy)]
pub struct LinearClassifierTrainer {
    /// Gradient descent iterations per class.
    pub max_iter: usize,
    /// Stop when the gradient norm falls below this.
    pub tol: f64,
    pub learning_rate: f64,
    /// L2 penalty, divided by the number of training rows.
    pub l2: f64,
}

impl Default for LinearClassifierTrainer {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.1,
            l2: 1.0,
        }
    }
}

impl ModelTrainer for LinearClassifierTrainer {
    fn name(&self) -> &'static str {
        "linear_classifier"
    }

    fn fit(&self, data: &TrainingData<'_>, _on_epoch: &mut EpochObserver<'_>) -> Result<TrainingOutcome> {
        if data.problem_type != ProblemType::Classification {
            return Err(ExperimentError::Computation(
                "linear classifier requires a classification target".to_string(),
            ));
        }
        let model = LinearClassifier::fit(data.x_train, data.y_train, data.n_classes, self)?;
        debug!(classes = model.n_classes(), "Fitted linear classifier");
        one_shot_outcome(TrainedModel::Classifier(model), data)
    }
}
