//! The [`Toolchain`] seam between the environment and external tools.
//!
//! [`ProcessToolchain`] runs real subprocesses from an immutable
//! [`ToolchainConfig`]. Implementations must be `Send + Sync` so that
//! independent programs can be rolled out in parallel against one shared
//! toolchain.

use std::ffi::OsStr;
use std::path::Path;

use crate::config::{ToolchainConfig, TransientPolicy, FLAG, INPUT, OUTPUT};
use crate::error::ToolchainError;
use crate::measure::MEASUREMENT_MARKER;
use crate::process::{self, ToolOutput};

/// The four logical operations on variant artifacts, plus self-description.
///
/// A nonzero exit status is returned as a [`ToolOutput`], not an error;
/// `Err` means the tool produced no output at all.
pub trait Toolchain: Send + Sync {
    /// IR -> object file.
    fn compile(&self, ir: &Path, object: &Path) -> Result<ToolOutput, ToolchainError>;

    /// Object file -> executable.
    fn link(&self, object: &Path, executable: &Path) -> Result<ToolOutput, ToolchainError>;

    /// Apply one transformation flag to `input`, writing `output`.
    fn transform(&self, flag: &str, input: &Path, output: &Path) -> Result<ToolOutput, ToolchainError>;

    /// Run `executable` under the profiling wrapper.
    fn measure(&self, executable: &Path) -> Result<ToolOutput, ToolchainError>;

    /// Pass listing used for catalog discovery.
    fn describe(&self) -> Result<ToolOutput, ToolchainError>;

    /// Which measurement failures are retried instead of reported.
    fn transient_policy(&self) -> &TransientPolicy;

    /// Marker enclosing the measurement record.
    fn measurement_marker(&self) -> &str {
        MEASUREMENT_MARKER
    }
}

/// Toolchain backed by external processes (llc, clang++, opt, GNU time).
#[derive(Debug, Clone, Default)]
pub struct ProcessToolchain {
    config: ToolchainConfig,
}

impl ProcessToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        ProcessToolchain { config }
    }
}

impl Toolchain for ProcessToolchain {
    fn compile(&self, ir: &Path, object: &Path) -> Result<ToolOutput, ToolchainError> {
        process::run(
            &self.config.compile,
            &[(INPUT, ir.as_os_str()), (OUTPUT, object.as_os_str())],
        )
    }

    fn link(&self, object: &Path, executable: &Path) -> Result<ToolOutput, ToolchainError> {
        process::run(
            &self.config.link,
            &[(INPUT, object.as_os_str()), (OUTPUT, executable.as_os_str())],
        )
    }

    fn transform(&self, flag: &str, input: &Path, output: &Path) -> Result<ToolOutput, ToolchainError> {
        process::run(
            &self.config.transform,
            &[
                (FLAG, OsStr::new(flag)),
                (INPUT, input.as_os_str()),
                (OUTPUT, output.as_os_str()),
            ],
        )
    }

    fn measure(&self, executable: &Path) -> Result<ToolOutput, ToolchainError> {
        process::run(&self.config.measure, &[(INPUT, executable.as_os_str())])
    }

    fn describe(&self) -> Result<ToolOutput, ToolchainError> {
        process::run(&self.config.describe, &[])
    }

    fn transient_policy(&self) -> &TransientPolicy {
        &self.config.transient
    }
}
