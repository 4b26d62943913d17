//! Permutation feature importance.
//!
//! Importance of a feature is the mean drop in score when that feature's
//! column is shuffled in the validation partition. Classification scores
//! accuracy, regression scores negative MSE, so a larger drop always means a
//! more important feature.
//!
//! Scoring goes through [`ImportanceScorer`]. One-shot models use their
//! native prediction interface via [`EstimatorScorer`]; the neural network is
//! wrapped by [`NeuralScoringAdapter`], which decodes raw network outputs. The
//! engine itself is a trait so callers can inject their own.

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use tracing::debug;

use crate::config::ProblemType;
use crate::error::{ExperimentError, Result};
use crate::metrics::{accuracy, mean_squared_error};
use crate::models::{Model, NeuralNetwork, TrainedModel};
use crate::types::FeatureImportance;

/// Scores a model on a feature matrix; higher is better.
pub trait ImportanceScorer: Send + Sync {
    fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64>;
}

fn score_predictions(problem_type: ProblemType, y: &Array1<f64>, predictions: &Array1<f64>) -> f64 {
    match problem_type {
        ProblemType::Classification => accuracy(y, predictions),
        ProblemType::Regression => -mean_squared_error(y, predictions),
    }
}

/// Scores any [`Model`] through its `predict` method.
pub struct EstimatorScorer<'a, M: Model + ?Sized> {
    model: &'a M,
    problem_type: ProblemType,
}

impl<'a, M: Model + ?Sized> EstimatorScorer<'a, M> {
    pub fn new(model: &'a M, problem_type: ProblemType) -> Self {
        Self {
            model,
            problem_type,
        }
    }
}

impl<M: Model + ?Sized> ImportanceScorer for EstimatorScorer<'_, M> {
    fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let predictions = self.model.predict(x)?;
        Ok(score_predictions(self.problem_type, y, &predictions))
    }
}

/// Scores a [`NeuralNetwork`] from its raw outputs.
pub struct NeuralScoringAdapter<'a> {
    network: &'a NeuralNetwork,
    problem_type: ProblemType,
}

impl<'a> NeuralScoringAdapter<'a> {
    pub fn new(network: &'a NeuralNetwork, problem_type: ProblemType) -> Self {
        Self {
            network,
            problem_type,
        }
    }
}

impl ImportanceScorer for NeuralScoringAdapter<'_> {
    fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let outputs = self.network.logits(x)?;
        let predictions = self.network.decode(&outputs);
        Ok(score_predictions(self.problem_type, y, &predictions))
    }
}

/// Select the scorer for a trained model.
pub fn scorer_for(model: &TrainedModel, problem_type: ProblemType) -> Box<dyn ImportanceScorer + '_> {
    match model {
        TrainedModel::Neural(network) => Box::new(NeuralScoringAdapter::new(network, problem_type)),
        TrainedModel::Classifier(m) => Box::new(EstimatorScorer::new(m, problem_type)),
        TrainedModel::Regressor(m) => Box::new(EstimatorScorer::new(m, problem_type)),
    }
}

/// Inputs of an importance computation.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceRequest<'a> {
    /// Scaled validation features.
    pub x: &'a Array2<f64>,
    /// Encoded validation targets.
    pub y: &'a Array1<f64>,
    /// Names of the columns of `x`.
    pub feature_names: &'a [String],
    pub repeats: u32,
    pub seed: u64,
}

/// Computes feature importances for a scorer.
pub trait ImportanceEngine: Send + Sync {
    /// Importances sorted descending by mean score drop.
    fn compute(
        &self,
        scorer: &dyn ImportanceScorer,
        request: &ImportanceRequest<'_>,
    ) -> Result<Vec<FeatureImportance>>;
}

/// Permutation importance with repeats computed in parallel.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermutationImportance;

impl PermutationImportance {
    fn repeat_seed(seed: u64, feature: usize, repeat: u32) -> u64 {
        seed.wrapping_add(((feature as u64) << 32) | u64::from(repeat))
    }
}

impl ImportanceEngine for PermutationImportance {
    fn compute(
        &self,
        scorer: &dyn ImportanceScorer,
        request: &ImportanceRequest<'_>,
    ) -> Result<Vec<FeatureImportance>> {
        let x = request.x;
        if x.ncols() != request.feature_names.len() {
            return Err(ExperimentError::Computation(format!(
                "{} feature names for {} columns",
                request.feature_names.len(),
                x.ncols()
            )));
        }
        if request.repeats == 0 {
            return Err(ExperimentError::Computation(
                "permutation importance needs at least one repeat".to_string(),
            ));
        }

        let baseline = scorer.score(x, request.y)?;
        if !baseline.is_finite() {
            return Err(ExperimentError::Computation(
                "baseline importance score is not finite".to_string(),
            ));
        }

        let mut importances = Vec::with_capacity(x.ncols());
        for (feature, name) in request.feature_names.iter().enumerate() {
            let drops: Vec<f64> = (0..request.repeats)
                .into_par_iter()
                .map(|repeat| {
                    let mut rng = Xoshiro256PlusPlus::seed_from_u64(Self::repeat_seed(
                        request.seed,
                        feature,
                        repeat,
                    ));
                    let mut column: Vec<f64> = x.column(feature).to_vec();
                    column.shuffle(&mut rng);

                    let mut permuted = x.to_owned();
                    permuted.column_mut(feature).assign(&Array1::from(column));
                    let score = scorer.score(&permuted, request.y)?;
                    if !score.is_finite() {
                        return Err(ExperimentError::Computation(format!(
                            "permuted score for '{name}' is not finite"
                        )));
                    }
                    Ok(baseline - score)
                })
                .collect::<Result<Vec<f64>>>()?;

            let n = drops.len() as f64;
            let mean = drops.iter().sum::<f64>() / n;
            let std = (drops.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
            importances.push(FeatureImportance::new(name.clone(), mean, std));
        }

        importances.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        debug!(features = importances.len(), "Computed permutation importance");
        Ok(importances)
    }
}
