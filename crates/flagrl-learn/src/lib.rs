//! Deep Q-learning over the flag-selection environment.
//!
//! # Modules
//!
//! - [`config`] -- `TrainConfig` hyperparameters and validation
//! - [`buffer`] -- Bounded experience buffer with random eviction
//! - [`approximator`] -- The `QFunction` seam and the `Mlp` network
//! - [`policy`] -- Epsilon-greedy selection
//! - [`trainer`] -- Rollouts, learning steps, target sync and evaluation
//! - [`error`] -- `LearnError`

pub mod approximator;
pub mod buffer;
pub mod config;
pub mod error;
pub mod policy;
pub mod trainer;

pub use approximator::{FitSample, Mlp, QFunction};
pub use buffer::{ReplayBuffer, SamplingPolicy};
pub use config::TrainConfig;
pub use error::LearnError;
pub use policy::{argmax, EpsilonGreedy};
pub use trainer::{Evaluation, ProgramSpeedup, TrainReport, Trainer};
