//! Immutable toolchain configuration.
//!
//! Command lines are templates with `{input}`, `{output}` and `{flag}`
//! placeholders, rendered fresh for every invocation. Nothing here is
//! mutated after construction, so one configuration can be shared by any
//! number of programs and threads.

use std::ffi::{OsStr, OsString};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::ToolOutput;

/// Placeholder for the input artifact path.
pub const INPUT: &str = "{input}";
/// Placeholder for the output artifact path.
pub const OUTPUT: &str = "{output}";
/// Placeholder for the transformation flag.
pub const FLAG: &str = "{flag}";

/// A program plus argument templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: &str, args: &[&str]) -> Self {
        CommandTemplate {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Substitute placeholders.
    ///
    /// An argument that is exactly one placeholder is replaced by the bound
    /// value verbatim (so non-UTF-8 paths survive); placeholders embedded in
    /// a longer argument are replaced textually.
    pub fn render(&self, bindings: &[(&str, &OsStr)]) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if let Some((_, value)) = bindings.iter().find(|(name, _)| *name == arg.as_str()) {
                    return value.to_os_string();
                }
                let mut text = arg.clone();
                for (name, value) in bindings {
                    if text.contains(*name) {
                        text = text.replace(*name, &value.to_string_lossy());
                    }
                }
                OsString::from(text)
            })
            .collect()
    }
}

/// Classifies measurement failures that are resource races in the profiler
/// rather than properties of the program under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientPolicy {
    /// Exit status reported when the profiler cannot allocate memory.
    pub exit_code: Option<i32>,
    /// Diagnostic text with the same meaning.
    pub stderr_marker: Option<String>,
    /// Pause between retries.
    pub retry_delay_ms: u64,
}

impl TransientPolicy {
    /// Whether a failed invocation should be retried rather than reported.
    pub fn matches(&self, output: &ToolOutput) -> bool {
        if output.success() {
            return false;
        }
        let by_status = self.exit_code.is_some() && output.status == self.exit_code;
        let by_text = self
            .stderr_marker
            .as_deref()
            .is_some_and(|marker| output.stderr.contains(marker));
        by_status || by_text
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for TransientPolicy {
    fn default() -> Self {
        TransientPolicy {
            // ENOMEM
            exit_code: Some(12),
            stderr_marker: Some("Cannot allocate memory".to_string()),
            retry_delay_ms: 100,
        }
    }
}

/// Command templates for every external operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// IR -> object file.
    pub compile: CommandTemplate,
    /// Object file -> executable.
    pub link: CommandTemplate,
    /// IR + flag -> IR.
    pub transform: CommandTemplate,
    /// Run an executable under the profiling wrapper.
    pub measure: CommandTemplate,
    /// Self-description listing the available passes.
    pub describe: CommandTemplate,
    pub transient: TransientPolicy,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            compile: CommandTemplate::new("llc", &["--filetype=obj", INPUT, "-o", OUTPUT]),
            link: CommandTemplate::new("clang++", &[INPUT, "-o", OUTPUT]),
            transform: CommandTemplate::new("opt", &["-S", FLAG, INPUT, "-o", OUTPUT]),
            measure: CommandTemplate::new(
                "/usr/bin/time",
                &[
                    "--format",
                    "SYMVEC%D %F %I %K %M %O %R %W %X %Z %c %p %r %s %t %w %S %USYMVEC",
                    INPUT,
                ],
            ),
            describe: CommandTemplate::new("opt", &["-h"]),
            transient: TransientPolicy::default(),
        }
    }
}
