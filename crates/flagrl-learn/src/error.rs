//! Learning error types.

use std::path::PathBuf;

use flagrl_env::EnvError;

/// Errors produced by the learning layer.
#[derive(Debug, thiserror::Error)]
pub enum LearnError {
    /// Batch size must be strictly smaller than the buffer capacity.
    #[error("batch size {batch_size} must be smaller than buffer capacity {capacity}")]
    InvalidBatchSize { batch_size: usize, capacity: usize },

    /// A configuration value is out of range.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A state's length does not match the approximator's input size.
    #[error("state dimension mismatch: expected {expected}, got {actual} ({context})")]
    StateDimensionMismatch {
        expected: usize,
        actual: usize,
        context: String,
    },

    /// Nothing to train on after the holdout split.
    #[error("no training programs available")]
    NoTrainingPrograms,

    /// Saving or loading approximator parameters failed.
    #[error("model I/O failed at {}: {reason}", path.display())]
    ModelIo { path: PathBuf, reason: String },

    /// A fatal environment error.
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl LearnError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        LearnError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
