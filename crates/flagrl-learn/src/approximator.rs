//! Action-value function approximators.
//!
//! [`QFunction`] is the seam the trainer programs against. [`Mlp`] is the
//! stock implementation: a small fully connected network with leaky ReLU
//! activations, trained by Adam on the mean squared TD error.

use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::LearnError;

const LEAKY_RELU_SLOPE: f32 = 0.01;
const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;

/// One regression target: move `predict(input)[action]` toward `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSample {
    pub input: Vec<f32>,
    pub action: usize,
    pub target: f32,
}

/// Maps a state to one score per action.
pub trait QFunction: Clone + Send + Sync {
    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Scores for every action. `input.len()` must equal `input_dim()`.
    fn predict(&self, input: &[f32]) -> Vec<f32>;

    /// One optimizer step on the batch; returns the pre-update loss.
    ///
    /// Every gradient element is clamped to `[-grad_clip, grad_clip]`.
    /// An empty batch changes nothing and reports zero loss.
    fn fit(&mut self, batch: &[FitSample], grad_clip: f32) -> f32;

    /// All parameters, flattened in a fixed order.
    fn parameters(&self) -> Vec<f32>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

#[inline]
fn leaky_relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        LEAKY_RELU_SLOPE * x
    }
}

#[inline]
fn leaky_relu_deriv(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        LEAKY_RELU_SLOPE
    }
}

/// A dense layer with its Adam moments.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layer {
    inputs: usize,
    outputs: usize,
    /// Row-major `outputs x inputs`.
    weights: Vec<f32>,
    bias: Vec<f32>,
    m_weights: Vec<f32>,
    v_weights: Vec<f32>,
    m_bias: Vec<f32>,
    v_bias: Vec<f32>,
}

impl Layer {
    fn new(inputs: usize, outputs: usize, rng: &mut ChaCha8Rng) -> Self {
        let bound = 1.0 / (inputs.max(1) as f32).sqrt();
        let weights = (0..inputs * outputs).map(|_| rng.gen_range(-bound..=bound)).collect();
        let bias = (0..outputs).map(|_| rng.gen_range(-bound..=bound)).collect();
        Layer {
            inputs,
            outputs,
            weights,
            bias,
            m_weights: vec![0.0; inputs * outputs],
            v_weights: vec![0.0; inputs * outputs],
            m_bias: vec![0.0; outputs],
            v_bias: vec![0.0; outputs],
        }
    }

    /// Pre-activations `W x + b`.
    fn affine(&self, input: &[f32]) -> Vec<f32> {
        let mut z = self.bias.clone();
        for (o, zo) in z.iter_mut().enumerate() {
            let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
            *zo += row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
        }
        z
    }
}

/// Gradient of the loss with respect to one layer.
#[derive(Debug, Clone)]
struct LayerGrad {
    weights: Vec<f32>,
    bias: Vec<f32>,
}

/// Activations kept from a forward pass for backpropagation.
struct Trace {
    /// `inputs[l]` is the input of layer `l`.
    inputs: Vec<Vec<f32>>,
    /// `pre[l]` is the pre-activation of layer `l`.
    pre: Vec<Vec<f32>>,
    output: Vec<f32>,
}

/// Four-layer perceptron `[in, in/2, in/4, out]` (hidden sizes at least 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<Layer>,
    learning_rate: f32,
    /// Adam step counter.
    steps: u32,
    #[serde(skip)]
    training: bool,
}

impl Mlp {
    /// A freshly initialized network; identical seeds give identical weights.
    pub fn new(input_dim: usize, output_dim: usize, learning_rate: f32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sizes = Mlp::layer_sizes(input_dim, output_dim);
        let layers = sizes
            .windows(2)
            .map(|pair| Layer::new(pair[0], pair[1], &mut rng))
            .collect();
        Mlp {
            layers,
            learning_rate,
            steps: 0,
            training: true,
        }
    }

    /// Widths of every layer boundary, input first.
    pub fn layer_sizes(input_dim: usize, output_dim: usize) -> [usize; 4] {
        [
            input_dim,
            (input_dim / 2).max(1),
            (input_dim / 4).max(1),
            output_dim,
        ]
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Replace the Adam step size; moments and the step count are kept.
    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// File the parameters of an `input_dim x output_dim` network live in.
    pub fn model_path(dir: &Path, input_dim: usize, output_dim: usize) -> PathBuf {
        dir.join(format!("{}_{}.model.json", input_dim, output_dim))
    }

    /// Write parameters and optimizer state to `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, LearnError> {
        let path = Mlp::model_path(dir, self.input_dim(), self.output_dim());
        let io = |reason: String| LearnError::ModelIo {
            path: path.clone(),
            reason,
        };
        std::fs::create_dir_all(dir).map_err(|e| io(e.to_string()))?;
        let json = serde_json::to_string(self).map_err(|e| io(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| io(e.to_string()))?;
        Ok(path)
    }

    /// Read a network saved by [`save`](Self::save).
    pub fn load(dir: &Path, input_dim: usize, output_dim: usize) -> Result<Self, LearnError> {
        let path = Mlp::model_path(dir, input_dim, output_dim);
        let io = |reason: String| LearnError::ModelIo {
            path: path.clone(),
            reason,
        };
        let data = std::fs::read_to_string(&path).map_err(|e| io(e.to_string()))?;
        let mut mlp: Mlp = serde_json::from_str(&data).map_err(|e| io(e.to_string()))?;
        if !mlp.well_formed(input_dim, output_dim) {
            return Err(io(format!(
                "stored network does not have layers {:?}",
                Mlp::layer_sizes(input_dim, output_dim)
            )));
        }
        mlp.training = true;
        Ok(mlp)
    }

    fn well_formed(&self, input_dim: usize, output_dim: usize) -> bool {
        let sizes = Mlp::layer_sizes(input_dim, output_dim);
        self.layers.len() == sizes.len() - 1
            && self.layers.iter().zip(sizes.windows(2)).all(|(layer, pair)| {
                layer.inputs == pair[0]
                    && layer.outputs == pair[1]
                    && layer.weights.len() == pair[0] * pair[1]
                    && layer.bias.len() == pair[1]
                    && layer.m_weights.len() == layer.weights.len()
                    && layer.v_weights.len() == layer.weights.len()
                    && layer.m_bias.len() == layer.bias.len()
                    && layer.v_bias.len() == layer.bias.len()
            })
    }

    fn forward(&self, input: &[f32]) -> Trace {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre = Vec::with_capacity(self.layers.len());
        let mut activation = input.to_vec();
        for layer in &self.layers {
            let z = layer.affine(&activation);
            let next = z.iter().map(|&x| leaky_relu(x)).collect();
            inputs.push(std::mem::replace(&mut activation, next));
            pre.push(z);
        }
        Trace {
            inputs,
            pre,
            output: activation,
        }
    }

    /// Mean squared error over the batch and its clamped gradients.
    fn backward(&self, batch: &[FitSample], grad_clip: f32) -> (f32, Vec<LayerGrad>) {
        let mut grads: Vec<LayerGrad> = self
            .layers
            .iter()
            .map(|l| LayerGrad {
                weights: vec![0.0; l.weights.len()],
                bias: vec![0.0; l.bias.len()],
            })
            .collect();
        let scale = 1.0 / batch.len() as f32;
        let mut loss = 0.0;

        for sample in batch {
            let trace = self.forward(&sample.input);
            let error = trace.output[sample.action] - sample.target;
            loss += error * error * scale;

            // dL/d(output): only the chosen action contributes.
            let mut delta = vec![0.0; trace.output.len()];
            delta[sample.action] = 2.0 * error * scale;

            for (l, layer) in self.layers.iter().enumerate().rev() {
                let dz: Vec<f32> = delta
                    .iter()
                    .zip(&trace.pre[l])
                    .map(|(d, &z)| d * leaky_relu_deriv(z))
                    .collect();
                let input = &trace.inputs[l];
                let grad = &mut grads[l];
                for (o, &g) in dz.iter().enumerate() {
                    grad.bias[o] += g;
                    let row = &mut grad.weights[o * layer.inputs..(o + 1) * layer.inputs];
                    for (w, &x) in row.iter_mut().zip(input) {
                        *w += g * x;
                    }
                }
                if l > 0 {
                    let mut prev = vec![0.0; layer.inputs];
                    for (o, &g) in dz.iter().enumerate() {
                        let row = &layer.weights[o * layer.inputs..(o + 1) * layer.inputs];
                        for (p, &w) in prev.iter_mut().zip(row) {
                            *p += g * w;
                        }
                    }
                    delta = prev;
                }
            }
        }

        for grad in &mut grads {
            for g in grad.weights.iter_mut().chain(grad.bias.iter_mut()) {
                *g = g.clamp(-grad_clip, grad_clip);
            }
        }
        (loss, grads)
    }

    fn adam_step(&mut self, grads: &[LayerGrad]) {
        self.steps += 1;
        let t = self.steps as i32;
        let correction1 = 1.0 - ADAM_BETA1.powi(t);
        let correction2 = 1.0 - ADAM_BETA2.powi(t);
        let lr = self.learning_rate;

        let update = |param: &mut [f32], m: &mut [f32], v: &mut [f32], grad: &[f32]| {
            for i in 0..param.len() {
                m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * grad[i];
                v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * grad[i] * grad[i];
                let m_hat = m[i] / correction1;
                let v_hat = v[i] / correction2;
                param[i] -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
        };
        for (layer, grad) in self.layers.iter_mut().zip(grads) {
            update(&mut layer.weights, &mut layer.m_weights, &mut layer.v_weights, &grad.weights);
            update(&mut layer.bias, &mut layer.m_bias, &mut layer.v_bias, &grad.bias);
        }
    }
}

impl QFunction for Mlp {
    fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.outputs)
    }

    fn predict(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.input_dim());
        self.forward(input).output
    }

    fn fit(&mut self, batch: &[FitSample], grad_clip: f32) -> f32 {
        if batch.is_empty() {
            return 0.0;
        }
        let (loss, grads) = self.backward(batch, grad_clip);
        self.adam_step(&grads);
        loss
    }

    fn parameters(&self) -> Vec<f32> {
        self.layers
            .iter()
            .flat_map(|l| l.weights.iter().chain(&l.bias).copied())
            .collect()
    }

    /// The network has no train-only layers, so the mode is bookkeeping
    /// for callers.
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(input: Vec<f32>, action: usize, target: f32) -> FitSample {
        FitSample { input, action, target }
    }

    #[test]
    fn layer_sizes_halve_then_quarter() {
        assert_eq!(Mlp::layer_sizes(18, 40), [18, 9, 4, 40]);
        assert_eq!(Mlp::layer_sizes(3, 2), [3, 1, 1, 2]);
        assert_eq!(Mlp::layer_sizes(1, 5), [1, 1, 1, 5]);

        let mlp = Mlp::new(18, 40, 0.01, 0);
        assert_eq!(mlp.input_dim(), 18);
        assert_eq!(mlp.output_dim(), 40);
        assert_eq!(mlp.parameters().len(), 18 * 9 + 9 + 9 * 4 + 4 + 4 * 40 + 40);
        assert_eq!(mlp.predict(&[0.5; 18]).len(), 40);
    }

    #[test]
    fn zero_width_input_still_builds() {
        let mlp = Mlp::new(0, 3, 0.01, 0);
        assert_eq!(mlp.input_dim(), 0);
        let scores = mlp.predict(&[]);
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn initialization_is_seeded_and_bounded() {
        let a = Mlp::new(8, 3, 0.01, 7);
        let b = Mlp::new(8, 3, 0.01, 7);
        let c = Mlp::new(8, 3, 0.01, 8);
        assert_eq!(a.parameters(), b.parameters());
        assert_ne!(a.parameters(), c.parameters());

        let bound = 1.0 / (8.0f32).sqrt();
        assert!(a.layers[0].weights.iter().all(|w| w.abs() <= bound));
    }

    #[test]
    fn fitting_moves_prediction_toward_target() {
        let mut mlp = Mlp::new(4, 2, 0.01, 3);
        let batch = vec![sample(vec![0.5, -0.25, 1.0, 0.1], 1, 0.8)];
        let initial = mlp.fit(&batch, 1.0);
        let mut last = initial;
        for _ in 0..400 {
            last = mlp.fit(&batch, 1.0);
        }
        assert!(last < initial * 0.5, "loss {initial} -> {last}");
    }

    #[test]
    fn empty_batch_changes_nothing() {
        let mut mlp = Mlp::new(4, 2, 0.01, 3);
        let before = mlp.parameters();
        assert_eq!(mlp.fit(&[], 1.0), 0.0);
        assert_eq!(mlp.parameters(), before);
    }

    #[test]
    fn gradients_are_clamped_elementwise() {
        let mlp = Mlp::new(4, 2, 0.01, 5);
        let batch = vec![sample(vec![50.0, -80.0, 30.0, 90.0], 0, 1000.0)];
        let (_, grads) = mlp.backward(&batch, 0.05);
        let all: Vec<f32> = grads
            .iter()
            .flat_map(|g| g.weights.iter().chain(&g.bias).copied())
            .collect();
        assert!(all.iter().all(|g| (-0.05..=0.05).contains(g)));
        assert!(all.iter().any(|g| g.abs() == 0.05));
    }

    #[test]
    fn untouched_actions_get_no_output_gradient() {
        let mlp = Mlp::new(4, 3, 0.01, 5);
        let batch = vec![sample(vec![1.0, 2.0, 3.0, 4.0], 2, 10.0)];
        let (_, grads) = mlp.backward(&batch, 100.0);
        let last = &grads[2];
        assert_eq!(last.bias[0], 0.0);
        assert_eq!(last.bias[1], 0.0);
        assert_ne!(last.bias[2], 0.0);
    }

    #[test]
    fn clone_is_bit_identical() {
        let mut online = Mlp::new(6, 4, 0.01, 1);
        online.fit(&[sample(vec![1.0; 6], 0, 2.0)], 1.0);
        let target = online.clone();
        let a: Vec<u32> = online.parameters().iter().map(|p| p.to_bits()).collect();
        let b: Vec<u32> = target.parameters().iter().map(|p| p.to_bits()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut mlp = Mlp::new(6, 4, 0.01, 1);
        mlp.fit(&[sample(vec![1.0; 6], 3, 2.0)], 1.0);
        let path = mlp.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("6_4.model.json"));

        let loaded = Mlp::load(dir.path(), 6, 4).unwrap();
        assert_eq!(loaded.parameters(), mlp.parameters());
        assert!(loaded.is_training());
        assert_eq!(loaded.steps, 1);
        assert_eq!(loaded.learning_rate(), 0.01);
    }

    #[test]
    fn resumed_network_takes_a_new_learning_rate() {
        let dir = tempfile::tempdir().unwrap();
        Mlp::new(6, 4, 0.01, 1).save(dir.path()).unwrap();

        let mut slow = Mlp::load(dir.path(), 6, 4).unwrap();
        let mut fast = slow.clone();
        fast.set_learning_rate(0.1);
        assert_eq!(fast.learning_rate(), 0.1);
        assert_eq!(fast.steps, slow.steps);

        let before = slow.parameters();
        let shift = |after: Vec<f32>| -> f32 { after.iter().zip(&before).map(|(a, b)| (a - b).abs()).sum() };
        let batch = [sample(vec![1.0; 6], 2, 5.0)];
        slow.fit(&batch, 1.0);
        fast.fit(&batch, 1.0);
        assert!(shift(fast.parameters()) > shift(slow.parameters()));
    }

    #[test]
    fn load_rejects_missing_or_mismatched_models() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Mlp::load(dir.path(), 6, 4), Err(LearnError::ModelIo { .. })));

        let mlp = Mlp::new(6, 4, 0.01, 1);
        mlp.save(dir.path()).unwrap();
        std::fs::rename(
            Mlp::model_path(dir.path(), 6, 4),
            Mlp::model_path(dir.path(), 8, 4),
        )
        .unwrap();
        assert!(matches!(Mlp::load(dir.path(), 8, 4), Err(LearnError::ModelIo { .. })));
    }
}
