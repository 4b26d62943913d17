//! Model trainers and trained models.
//!
//! Every model family sits behind the [`ModelTrainer`] trait. A trainer
//! consumes the scaled partitions and returns a [`TrainingOutcome`] holding
//! the [`TrainedModel`], its predictions on both partitions and, for the
//! neural family, the per-epoch history.
//!
//! | Family | Trainer | Model |
//! |---|---|---|
//! | neural | [`NeuralTrainer`] | [`NeuralNetwork`] |
//! | classifier | [`LinearClassifierTrainer`] | [`LinearClassifier`] |
//! | regressor | [`LinearRegressorTrainer`] | [`LinearRegressor`] |

pub mod linear;
pub mod neural;

use ndarray::{Array1, Array2};

use crate::config::{ModelFamily, ProblemType, TrainingConfig};
use crate::data::Split;
use crate::error::Result;
use crate::types::EpochRecord;

pub use linear::{LinearClassifier, LinearClassifierTrainer, LinearRegressor, LinearRegressorTrainer};
pub use neural::{NeuralNetwork, NeuralTrainer};

/// Inference interface shared by all trained models.
pub trait Model: Send + Sync {
    /// Predict class indices (classification) or values (regression).
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Class probabilities, one column per class. `None` for regression.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>>;
}

/// A model produced by exactly one trainer.
#[derive(Debug, Clone)]
pub enum TrainedModel {
    Neural(NeuralNetwork),
    Classifier(LinearClassifier),
    Regressor(LinearRegressor),
}

impl Model for TrainedModel {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedModel::Neural(m) => m.predict(x),
            TrainedModel::Classifier(m) => m.predict(x),
            TrainedModel::Regressor(m) => m.predict(x),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        match self {
            TrainedModel::Neural(m) => m.predict_proba(x),
            TrainedModel::Classifier(m) => m.predict_proba(x),
            TrainedModel::Regressor(m) => m.predict_proba(x),
        }
    }
}

/// Scaled partitions handed to a trainer.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub x_train: &'a Array2<f64>,
    pub y_train: &'a Array1<f64>,
    pub x_test: &'a Array2<f64>,
    pub y_test: &'a Array1<f64>,
    pub problem_type: ProblemType,
    /// Number of classes, 0 for regression.
    pub n_classes: usize,
}

impl<'a> TrainingData<'a> {
    pub fn from_split(split: &'a Split, problem_type: ProblemType, n_classes: usize) -> Self {
        Self {
            x_train: &split.x_train,
            y_train: &split.y_train,
            x_test: &split.x_test,
            y_test: &split.y_test,
            problem_type,
            n_classes,
        }
    }
}

/// Everything a trainer produces.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    /// Predictions on the validation partition.
    pub test_predictions: Array1<f64>,
    /// Predictions on the training partition.
    pub train_predictions: Array1<f64>,
    /// Class probabilities on the validation partition (classification only).
    pub test_probabilities: Option<Array2<f64>>,
    /// Per-epoch history, empty for one-shot trainers.
    pub epochs: Vec<EpochRecord>,
    /// Wall-clock seconds per epoch, parallel to `epochs`.
    pub epoch_durations: Vec<f64>,
}

/// Observer invoked after each completed epoch.
pub type EpochObserver<'a> = dyn FnMut(&EpochRecord) + 'a;

/// A model family's training procedure.
pub trait ModelTrainer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fit a model on the training partition and predict both partitions.
    ///
    /// `on_epoch` is called once per completed epoch by iterative trainers.
    fn fit(&self, data: &TrainingData<'_>, on_epoch: &mut EpochObserver<'_>)
    -> Result<TrainingOutcome>;
}

/// Select the trainer for the configured model family.
pub fn trainer_for(config: &TrainingConfig) -> Box<dyn ModelTrainer> {
    match config.model_family {
        ModelFamily::Neural => Box::new(NeuralTrainer::new(
            config.epochs,
            config.learning_rate,
            config.random_seed,
        )),
        ModelFamily::Classifier => Box::new(LinearClassifierTrainer::default()),
        ModelFamily::Regressor => Box::new(LinearRegressorTrainer),
    }
}

/// Fit with a one-shot trainer: no epochs, predictions from the fitted model.
pub(crate) fn one_shot_outcome(model: TrainedModel, data: &TrainingData<'_>) -> Result<TrainingOutcome> {
    let test_predictions = model.predict(data.x_test)?;
    let train_predictions = model.predict(data.x_train)?;
    let test_probabilities = model.predict_proba(data.x_test)?;
    Ok(TrainingOutcome {
        model,
        test_predictions,
        train_predictions,
        test_probabilities,
        epochs: Vec::new(),
        epoch_durations: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainer_dispatch() {
        let mut config = TrainingConfig::default();
        assert_eq!(trainer_for(&config).name(), "neural");

        config.model_family = ModelFamily::Classifier;
        assert_eq!(trainer_for(&config).name(), "linear_classifier");

        config.model_family = ModelFamily::Regressor;
        assert_eq!(trainer_for(&config).name(), "linear_regressor");
    }
}
