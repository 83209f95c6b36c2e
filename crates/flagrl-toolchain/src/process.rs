//! Subprocess execution.
//!
//! Every external operation is a synchronous, blocking process invocation
//! returning its exit status and captured output.

use std::ffi::OsStr;
use std::process::Command;

use crate::config::CommandTemplate;
use crate::error::ToolchainError;

/// Exit status and captured output of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// An output with the given exit code.
    pub fn exited(code: i32, stdout: &str, stderr: &str) -> Self {
        ToolOutput {
            status: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    /// A zero-status output with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        ToolOutput::exited(0, stdout, "")
    }

    /// Zero exit status means success.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Short human-readable failure description for error messages.
    pub fn failure_summary(&self) -> String {
        let status = match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        let detail = self.stderr.trim();
        if detail.is_empty() {
            status
        } else {
            format!("{}: {}", status, detail)
        }
    }
}

/// Render `template` with `bindings` and run it to completion.
pub fn run(
    template: &CommandTemplate,
    bindings: &[(&str, &OsStr)],
) -> Result<ToolOutput, ToolchainError> {
    let args = template.render(bindings);
    tracing::debug!(program = %template.program, ?args, "running tool");

    let output = Command::new(&template.program)
        .args(&args)
        .output()
        .map_err(|source| ToolchainError::Spawn {
            program: template.program.clone(),
            source,
        })?;

    Ok(ToolOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
