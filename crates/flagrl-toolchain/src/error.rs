//! Toolchain error types.
//!
//! A nonzero exit status is not an error at this layer: it comes back as a
//! [`ToolOutput`](crate::ToolOutput) and the caller decides what it means.
//! These variants cover the cases where no usable output exists at all.

use std::path::PathBuf;

/// Errors produced while invoking or interpreting external tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// The tool could not be started (missing binary, permissions).
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Filesystem I/O error on a toolchain artifact.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The measurement output carried no record marker.
    #[error("measurement output has no '{marker}' record")]
    MissingMarker { marker: String },

    /// The measurement record could not be parsed.
    #[error("malformed measurement record '{record}': {reason}")]
    MalformedRecord { record: String, reason: String },

    /// The pass listing did not have the expected shape.
    #[error("pass discovery failed: {0}")]
    DiscoveryFailed(String),
}
