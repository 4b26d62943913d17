//! Train/validation partitioning and feature standardization.

use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;

use crate::error::{ExperimentError, Result};
use crate::utils::{select_rows, select_values};

/// Train and validation partitions.
#[derive(Debug, Clone)]
pub struct Split {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_test: Array1<f64>,
}

/// Partition rows into train and validation sets.
///
/// The validation set holds `ceil(test_fraction * n)` rows. When `n_classes`
/// is `Some`, `y` holds class indices and every class is represented in both
/// partitions in proportion to its frequency.
///
/// # Errors
///
/// Returns [`ExperimentError::Computation`] if either partition would be empty,
/// or if a stratified split is impossible (a class with fewer than two rows,
/// or fewer rows in a partition than there are classes).
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    test_fraction: f64,
    n_classes: Option<usize>,
    seed: u64,
) -> Result<Split> {
    let n = x.nrows();
    if n != y.len() {
        return Err(ExperimentError::Computation(format!(
            "feature rows ({n}) and target length ({}) differ",
            y.len()
        )));
    }

    let n_test = (test_fraction * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(ExperimentError::Computation(format!(
            "cannot split {n} rows with validation fraction {test_fraction}: \
             one partition would be empty"
        )));
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let (mut train_indices, mut test_indices) = match n_classes {
        Some(k) => stratified_indices(y, k, n_test, &mut rng)?,
        None => {
            let mut indices: Vec<usize> = (0..n).collect();
            indices.shuffle(&mut rng);
            let train = indices.split_off(n_test);
            (train, indices)
        }
    };
    train_indices.shuffle(&mut rng);
    test_indices.shuffle(&mut rng);

    debug!(
        train = train_indices.len(),
        test = test_indices.len(),
        stratified = n_classes.is_some(),
        "Split dataset"
    );

    Ok(Split {
        x_train: select_rows(x, &train_indices),
        x_test: select_rows(x, &test_indices),
        y_train: select_values(y, &train_indices),
        y_test: select_values(y, &test_indices),
    })
}

fn stratified_indices(
    y: &Array1<f64>,
    n_classes: usize,
    n_test: usize,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n = y.len();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (row, &label) in y.iter().enumerate() {
        let class = label as usize;
        if class >= n_classes {
            return Err(ExperimentError::Computation(format!(
                "class index {class} out of range for {n_classes} classes"
            )));
        }
        members[class].push(row);
    }

    let present: Vec<usize> = (0..n_classes).filter(|&c| !members[c].is_empty()).collect();
    if let Some(&c) = present.iter().find(|&&c| members[c].len() < 2) {
        return Err(ExperimentError::Computation(format!(
            "class {c} has only one member; stratified split needs at least two per class"
        )));
    }
    if n_test < present.len() || n - n_test < present.len() {
        return Err(ExperimentError::Computation(format!(
            "validation size {n_test} and train size {} must each be at least the number of classes ({})",
            n - n_test,
            present.len()
        )));
    }

    let allocation = allocate_test_counts(&members, n_test);

    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (rows, &take) in members.iter_mut().zip(&allocation) {
        rows.shuffle(rng);
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }
    Ok((train, test))
}

/// Split `n_test` across classes proportionally: floor shares first, then the
/// leftover rows go to the largest fractional remainders. Each class keeps at
/// least one training row and gets at least one validation row.
fn allocate_test_counts(members: &[Vec<usize>], n_test: usize) -> Vec<usize> {
    let n: usize = members.iter().map(Vec::len).sum();
    let mut allocation = Vec::with_capacity(members.len());
    let mut remainders = Vec::with_capacity(members.len());

    for (class, rows) in members.iter().enumerate() {
        if rows.is_empty() {
            allocation.push(0);
            continue;
        }
        let exact = rows.len() as f64 * n_test as f64 / n as f64;
        let share = (exact.floor() as usize).clamp(1, rows.len() - 1);
        allocation.push(share);
        remainders.push((exact - exact.floor(), class));
    }

    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut assigned: usize = allocation.iter().sum();
    while assigned < n_test {
        let mut progressed = false;
        for &(_, class) in &remainders {
            if assigned == n_test {
                break;
            }
            if allocation[class] + 1 < members[class].len() {
                allocation[class] += 1;
                assigned += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    while assigned > n_test {
        let mut progressed = false;
        for &(_, class) in remainders.iter().rev() {
            if assigned == n_test {
                break;
            }
            if allocation[class] > 1 {
                allocation[class] -= 1;
                assigned -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    allocation
}

/// Standardizes features to zero mean and unit variance.
///
/// Parameters are fit on the training partition only. Constant columns keep
/// a scale of 1 so they map to zero instead of NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit means and population standard deviations per column.
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            ExperimentError::Computation("cannot fit a scaler on zero rows".to_string())
        })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// Apply the fitted parameters. The result depends only on `x` and the
    /// fitted parameters.
    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }
}
