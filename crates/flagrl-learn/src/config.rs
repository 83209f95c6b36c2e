//! Training hyperparameters.

use serde::{Deserialize, Serialize};

use crate::buffer::SamplingPolicy;
use crate::error::LearnError;

/// Every tunable of a training run. Missing JSON fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Seed for every random choice in the run.
    pub seed: u64,
    /// Episodes to roll out before `train` returns.
    pub max_episodes: usize,
    /// Step budget per episode.
    pub max_steps: usize,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub sampling: SamplingPolicy,
    /// Discount factor.
    pub gamma: f64,
    pub learning_rate: f32,
    /// Per-element gradient clamp.
    pub grad_clip: f32,
    /// Initial exploration probability.
    pub epsilon: f64,
    pub epsilon_floor: f64,
    /// Subtracted from epsilon after every action selection.
    pub epsilon_decay: f64,
    /// Learn every this many episodes.
    pub update_interval: usize,
    /// Minimum buffered transitions before the first learning step. The
    /// default of 1 learns from partial batches as soon as anything is
    /// buffered.
    pub learn_starts: usize,
    /// Copy online into target every this many gradient steps.
    pub sync_interval: usize,
    /// Evaluate on held-out programs every this many episodes.
    pub eval_interval: usize,
    /// Share of programs held out for evaluation.
    pub holdout_fraction: f64,
    /// Episodes rolled out concurrently per round.
    pub rollout_workers: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            seed: 0,
            max_episodes: 100_000,
            max_steps: 30,
            buffer_capacity: 1000,
            batch_size: 128,
            sampling: SamplingPolicy::Retain,
            gamma: 0.9,
            learning_rate: 0.01,
            grad_clip: 1.0,
            epsilon: 0.9,
            epsilon_floor: 0.01,
            epsilon_decay: 1e-5,
            update_interval: 1,
            learn_starts: 1,
            sync_interval: 100,
            eval_interval: 1000,
            holdout_fraction: 0.2,
            rollout_workers: 1,
        }
    }
}

impl TrainConfig {
    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), LearnError> {
        if self.buffer_capacity == 0 {
            return Err(LearnError::config("buffer_capacity", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(LearnError::config("batch_size", "must be positive"));
        }
        if self.batch_size >= self.buffer_capacity {
            return Err(LearnError::InvalidBatchSize {
                batch_size: self.batch_size,
                capacity: self.buffer_capacity,
            });
        }
        for (field, value) in [
            ("max_steps", self.max_steps),
            ("update_interval", self.update_interval),
            ("sync_interval", self.sync_interval),
            ("eval_interval", self.eval_interval),
            ("rollout_workers", self.rollout_workers),
        ] {
            if value == 0 {
                return Err(LearnError::config(field, "must be positive"));
            }
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(LearnError::config("gamma", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(LearnError::config("epsilon", "must lie in [0, 1]"));
        }
        if !(0.0..=self.epsilon).contains(&self.epsilon_floor) {
            return Err(LearnError::config("epsilon_floor", "must lie in [0, epsilon]"));
        }
        if !(self.epsilon_decay >= 0.0 && self.epsilon_decay.is_finite()) {
            return Err(LearnError::config("epsilon_decay", "must be non-negative"));
        }
        if !(0.0..1.0).contains(&self.holdout_fraction) {
            return Err(LearnError::config("holdout_fraction", "must lie in [0, 1)"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(LearnError::config("learning_rate", "must be positive"));
        }
        if !(self.grad_clip > 0.0) {
            return Err(LearnError::config("grad_clip", "must be positive"));
        }
        Ok(())
    }
}
