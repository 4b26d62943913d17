//! Feed-forward neural network trained with full-batch Adam.
//!
//! Architecture: `input -> 128 -> 64 -> 32 -> output`, ReLU after every hidden
//! layer, dropout 0.5 after the first block and 0.3 after the second (training
//! passes only). The output width is 1 for regression and binary targets and
//! the class count otherwise.
//!
//! | Target | Output | Loss |
//! |---|---|---|
//! | regression | 1 linear unit | mean squared error |
//! | binary | 1 logit | log-loss on the logit |
//! | multiclass | one logit per class | cross-entropy |
//!
//! Each epoch runs one training step on the whole training partition, then an
//! evaluation pass over both partitions without dropout. Final predictions
//! come from the last evaluation pass.

use std::time::Instant;

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::{debug, info};

use super::{EpochObserver, Model, ModelTrainer, TrainedModel, TrainingData, TrainingOutcome};
use crate::config::ProblemType;
use crate::error::{ExperimentError, Result};
use crate::metrics::weighted_precision;
use crate::types::EpochRecord;
use crate::utils::{argmax, sigmoid};

/// Hidden layer widths.
pub const HIDDEN_LAYERS: [usize; 3] = [128, 64, 32];

/// Dropout probability after each hidden layer.
const DROPOUT: [f64; 3] = [0.5, 0.3, 0.0];

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// How the output layer is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    Regression,
    Binary,
    Multiclass(usize),
}

impl Head {
    fn new(problem_type: ProblemType, n_classes: usize) -> Result<Self> {
        match problem_type {
            ProblemType::Regression => Ok(Head::Regression),
            ProblemType::Classification if n_classes == 2 => Ok(Head::Binary),
            ProblemType::Classification if n_classes > 2 => Ok(Head::Multiclass(n_classes)),
            ProblemType::Classification => Err(ExperimentError::Computation(format!(
                "neural classifier needs at least 2 classes, got {n_classes}"
            ))),
        }
    }

    fn width(self) -> usize {
        match self {
            Head::Regression | Head::Binary => 1,
            Head::Multiclass(k) => k,
        }
    }

    /// Mean loss of the outputs against the targets.
    fn loss(self, output: &Array2<f64>, y: &Array1<f64>) -> f64 {
        let n = y.len().max(1) as f64;
        match self {
            Head::Regression => {
                output
                    .column(0)
                    .iter()
                    .zip(y.iter())
                    .map(|(o, t)| (o - t).powi(2))
                    .sum::<f64>()
                    / n
            }
            Head::Binary => {
                output
                    .column(0)
                    .iter()
                    .zip(y.iter())
                    .map(|(&z, &t)| z.max(0.0) - z * t + (-z.abs()).exp().ln_1p())
                    .sum::<f64>()
                    / n
            }
            Head::Multiclass(_) => {
                output
                    .rows()
                    .into_iter()
                    .zip(y.iter())
                    .map(|(row, &t)| {
                        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
                        let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f64>().ln() + max;
                        log_sum - row[t as usize]
                    })
                    .sum::<f64>()
                    / n
            }
        }
    }

    /// Gradient of the mean loss with respect to the outputs.
    fn output_gradient(self, output: &Array2<f64>, y: &Array1<f64>) -> Array2<f64> {
        let n = y.len().max(1) as f64;
        let mut grad = Array2::<f64>::zeros(output.raw_dim());
        for (i, &t) in y.iter().enumerate() {
            match self {
                Head::Regression => grad[[i, 0]] = 2.0 * (output[[i, 0]] - t) / n,
                Head::Binary => grad[[i, 0]] = (sigmoid(output[[i, 0]]) - t) / n,
                Head::Multiclass(_) => {
                    let probs = softmax(output.row(i));
                    for (j, p) in probs.into_iter().enumerate() {
                        let target = if j == t as usize { 1.0 } else { 0.0 };
                        grad[[i, j]] = (p - target) / n;
                    }
                }
            }
        }
        grad
    }

    /// Class indices or values from raw outputs.
    fn decode(self, output: &Array2<f64>) -> Array1<f64> {
        match self {
            Head::Regression => output.column(0).to_owned(),
            Head::Binary => output.column(0).mapv(|z| if z > 0.0 { 1.0 } else { 0.0 }),
            Head::Multiclass(_) => output
                .rows()
                .into_iter()
                .map(|row| argmax(row.iter()) as f64)
                .collect(),
        }
    }

    fn probabilities(self, output: &Array2<f64>) -> Option<Array2<f64>> {
        match self {
            Head::Regression => None,
            Head::Binary => {
                let mut proba = Array2::<f64>::zeros((output.nrows(), 2));
                for (i, &z) in output.column(0).iter().enumerate() {
                    let p = sigmoid(z);
                    proba[[i, 0]] = 1.0 - p;
                    proba[[i, 1]] = p;
                }
                Some(proba)
            }
            Head::Multiclass(k) => {
                let mut proba = Array2::<f64>::zeros((output.nrows(), k));
                for (i, row) in output.rows().into_iter().enumerate() {
                    for (j, p) in softmax(row).into_iter().enumerate() {
                        proba[[i, j]] = p;
                    }
                }
                Some(proba)
            }
        }
    }
}

fn softmax<'a>(values: impl IntoIterator<Item = &'a f64>) -> Vec<f64> {
    let values: Vec<f64> = values.into_iter().copied().collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Fully connected layer.
#[derive(Debug, Clone, PartialEq)]
struct Dense {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Dense {
    /// Uniform initialisation in `±1/sqrt(fan_in)`.
    fn new(n_in: usize, n_out: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let bound = 1.0 / (n_in.max(1) as f64).sqrt();
        let weights = Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound));
        let bias = Array1::from_shape_fn(n_out, |_| rng.gen_range(-bound..bound));
        Self { weights, bias }
    }

    fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

/// Cached activations of one training forward pass.
struct ForwardCache {
    /// Input to each layer.
    inputs: Vec<Array2<f64>>,
    /// Pre-activation of each hidden layer.
    hidden_z: Vec<Array2<f64>>,
    /// Scaled dropout masks of each hidden layer.
    masks: Vec<Option<Array2<f64>>>,
    output: Array2<f64>,
}

/// Adam moment estimates for one layer.
#[derive(Debug, Clone)]
struct AdamState {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl AdamState {
    fn for_layer(layer: &Dense) -> Self {
        Self {
            m_w: Array2::zeros(layer.weights.raw_dim()),
            v_w: Array2::zeros(layer.weights.raw_dim()),
            m_b: Array1::zeros(layer.bias.raw_dim()),
            v_b: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

/// Trained feed-forward network.
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralNetwork {
    layers: Vec<Dense>,
    head: Head,
}

impl NeuralNetwork {
    fn new(n_features: usize, head: Head, rng: &mut Xoshiro256PlusPlus) -> Self {
        let mut sizes = vec![n_features];
        sizes.extend(HIDDEN_LAYERS);
        sizes.push(head.width());
        let layers = sizes
            .windows(2)
            .map(|w| Dense::new(w[0], w[1], rng))
            .collect();
        Self { layers, head }
    }

    /// Number of input features.
    pub fn n_features(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.nrows())
    }

    /// Raw outputs (logits for classification) without dropout.
    pub fn logits(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(ExperimentError::Computation(format!(
                "network expects {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        let last = self.layers.len() - 1;
        let mut activation = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation);
            activation = if i < last { z.mapv(|v| v.max(0.0)) } else { z };
        }
        Ok(activation)
    }

    /// Decode raw outputs into class indices or values.
    pub fn decode(&self, output: &Array2<f64>) -> Array1<f64> {
        self.head.decode(output)
    }

    fn forward_train(&self, x: &Array2<f64>, rng: &mut Xoshiro256PlusPlus) -> ForwardCache {
        let last = self.layers.len() - 1;
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut hidden_z = Vec::with_capacity(last);
        let mut masks = Vec::with_capacity(last);
        let mut activation = x.to_owned();

        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation);
            inputs.push(activation);
            if i == last {
                return ForwardCache {
                    inputs,
                    hidden_z,
                    masks,
                    output: z,
                };
            }

            let mut a = z.mapv(|v| v.max(0.0));
            let p = DROPOUT.get(i).copied().unwrap_or(0.0);
            let mask = (p > 0.0).then(|| {
                let keep = 1.0 - p;
                Array2::from_shape_fn(a.raw_dim(), |_| {
                    if rng.r#gen::<f64>() < keep { 1.0 / keep } else { 0.0 }
                })
            });
            if let Some(mask) = &mask {
                a *= mask;
            }
            hidden_z.push(z);
            masks.push(mask);
            activation = a;
        }

        // Unreachable for a network with at least one layer.
        ForwardCache {
            inputs,
            hidden_z,
            masks,
            output: activation,
        }
    }

    fn gradients(&self, cache: &ForwardCache, y: &Array1<f64>) -> Vec<(Array2<f64>, Array1<f64>)> {
        let mut delta = self.head.output_gradient(&cache.output, y);
        let mut grads = Vec::with_capacity(self.layers.len());

        for i in (0..self.layers.len()).rev() {
            let grad_w = cache.inputs[i].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            grads.push((grad_w, grad_b));

            if i > 0 {
                let mut upstream = delta.dot(&self.layers[i].weights.t());
                if let Some(mask) = &cache.masks[i - 1] {
                    upstream *= mask;
                }
                let relu_grad = cache.hidden_z[i - 1].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                delta = upstream * relu_grad;
            }
        }

        grads.reverse();
        grads
    }

    fn adam_step(
        &mut self,
        grads: Vec<(Array2<f64>, Array1<f64>)>,
        state: &mut [AdamState],
        step: i32,
        learning_rate: f64,
    ) {
        let correction1 = 1.0 - ADAM_BETA1.powi(step);
        let correction2 = 1.0 - ADAM_BETA2.powi(step);

        for ((layer, s), (grad_w, grad_b)) in self.layers.iter_mut().zip(state.iter_mut()).zip(grads) {
            s.m_w = &s.m_w * ADAM_BETA1 + &grad_w * (1.0 - ADAM_BETA1);
            s.v_w = &s.v_w * ADAM_BETA2 + &grad_w.mapv(|g| g * g) * (1.0 - ADAM_BETA2);
            s.m_b = &s.m_b * ADAM_BETA1 + &grad_b * (1.0 - ADAM_BETA1);
            s.v_b = &s.v_b * ADAM_BETA2 + &grad_b.mapv(|g| g * g) * (1.0 - ADAM_BETA2);

            ndarray::Zip::from(&mut layer.weights)
                .and(&s.m_w)
                .and(&s.v_w)
                .for_each(|w, &m, &v| {
                    *w -= learning_rate * (m / correction1) / ((v / correction2).sqrt() + ADAM_EPSILON);
                });
            ndarray::Zip::from(&mut layer.bias)
                .and(&s.m_b)
                .and(&s.v_b)
                .for_each(|b, &m, &v| {
                    *b -= learning_rate * (m / correction1) / ((v / correction2).sqrt() + ADAM_EPSILON);
                });
        }
    }
}

impl Model for NeuralNetwork {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let output = self.logits(x)?;
        Ok(self.head.decode(&output))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        let output = self.logits(x)?;
        Ok(self.head.probabilities(&output))
    }
}

/// Trains a [`NeuralNetwork`] for a fixed number of epochs.
#[derive(Debug, Clone, Copy)]
pub struct NeuralTrainer {
    epochs: u32,
    learning_rate: f64,
    seed: u64,
}

impl NeuralTrainer {
    pub fn new(epochs: u32, learning_rate: f64, seed: u64) -> Self {
        Self {
            epochs,
            learning_rate,
            seed,
        }
    }
}

impl ModelTrainer for NeuralTrainer {
    fn name(&self) -> &'static str {
        "neural"
    }

    fn fit(&self, data: &TrainingData<'_>, on_epoch: &mut EpochObserver<'_>) -> Result<TrainingOutcome> {
        if self.epochs == 0 {
            return Err(ExperimentError::Computation(
                "neural training needs at least one epoch".to_string(),
            ));
        }
        let head = Head::new(data.problem_type, data.n_classes)?;
        let classification = data.problem_type == ProblemType::Classification;

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let mut network = NeuralNetwork::new(data.x_train.ncols(), head, &mut rng);
        let mut adam: Vec<AdamState> = network.layers.iter().map(AdamState::for_layer).collect();

        info!(
            epochs = self.epochs,
            learning_rate = self.learning_rate,
            outputs = head.width(),
            "Training neural network"
        );

        let mut epochs = Vec::with_capacity(self.epochs as usize);
        let mut durations = Vec::with_capacity(self.epochs as usize);
        let mut last_outputs = None;

        for epoch in 1..=self.epochs {
            let started = Instant::now();

            let cache = network.forward_train(data.x_train, &mut rng);
            let grads = network.gradients(&cache, data.y_train);
            let step = i32::try_from(epoch).unwrap_or(i32::MAX);
            network.adam_step(grads, &mut adam, step, self.learning_rate);

            let train_output = network.logits(data.x_train)?;
            let test_output = network.logits(data.x_test)?;
            let train_loss = head.loss(&train_output, data.y_train);
            let validation_loss = head.loss(&test_output, data.y_test);
            if !train_loss.is_finite() || !validation_loss.is_finite() {
                return Err(ExperimentError::Computation(format!(
                    "loss diverged at epoch {epoch}"
                )));
            }

            let mut record = EpochRecord::new(epoch, train_loss, validation_loss);
            if classification {
                record = record.with_precision(
                    weighted_precision(data.y_train, &head.decode(&train_output)),
                    weighted_precision(data.y_test, &head.decode(&test_output)),
                );
            }

            durations.push(started.elapsed().as_secs_f64());
            debug!(epoch, train_loss, validation_loss, "Epoch complete");
            on_epoch(&record);
            epochs.push(record);
            last_outputs = Some((train_output, test_output));
        }

        let (train_output, test_output) = last_outputs.ok_or_else(|| {
            ExperimentError::Computation("neural training produced no epochs".to_string())
        })?;

        Ok(TrainingOutcome {
            test_predictions: head.decode(&test_output),
            train_predictions: head.decode(&train_output),
            test_probabilities: head.probabilities(&test_output),
            model: TrainedModel::Neural(network),
            epochs,
            epoch_durations: durations,
        })
    }
}
