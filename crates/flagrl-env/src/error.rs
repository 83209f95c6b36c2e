//! Environment error types.
//!
//! Step failures (`OptFailed`, `BuildFailed`, `MeasurementFailed`,
//! `InvalidCost`) describe one variant attempt going wrong: the caller ends
//! the episode and carries on. Everything else means the environment itself
//! is unusable and should abort the run.

use std::path::PathBuf;

use flagrl_core::CoreError;
use flagrl_toolchain::ToolchainError;

/// Errors produced by the environment layer.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// The transform step exited nonzero.
    #[error("transform {flag} failed for {program} at {key}: {detail}")]
    OptFailed {
        program: String,
        key: String,
        flag: String,
        detail: String,
    },

    /// The compile or link step exited nonzero.
    #[error("build failed for {program} at {key}: {detail}")]
    BuildFailed {
        program: String,
        key: String,
        detail: String,
    },

    /// The measurement harness failed for a non-transient reason.
    #[error("measurement failed for {program} at {key}: {detail}")]
    MeasurementFailed {
        program: String,
        key: String,
        detail: String,
    },

    /// A measured cost was non-positive, so no reward exists.
    #[error("invalid cost for {program} at {key}: before={before}, after={after}")]
    InvalidCost {
        program: String,
        key: String,
        before: f64,
        after: f64,
    },

    /// The source is not a readable `.ll` file.
    #[error("invalid source {}: {reason}", path.display())]
    InvalidSource { path: PathBuf, reason: String },

    /// A cache entry exists but its artifacts are missing, unreadable or altered.
    #[error("variant cache corrupted at {}: {reason}", path.display())]
    CacheCorrupted { path: PathBuf, reason: String },

    /// The persisted catalog exists but cannot be used.
    #[error("action catalog corrupted at {}: {reason}", path.display())]
    CatalogCorrupted { path: PathBuf, reason: String },

    /// Discovery produced no usable flags.
    #[error("action catalog is empty")]
    EmptyCatalog,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// Filesystem I/O error.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EnvError {
    /// Whether this error ends only the current episode.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            EnvError::OptFailed { .. }
                | EnvError::BuildFailed { .. }
                | EnvError::MeasurementFailed { .. }
                | EnvError::InvalidCost { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EnvError::Io {
            path: path.into(),
            source,
        }
    }
}
