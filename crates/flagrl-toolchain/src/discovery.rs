//! Discovery of the action vocabulary from the pass listing of `opt -h`.
//!
//! The listing looks like:
//!
//! ```text
//! USAGE: opt [options] <input bitcode file>
//!
//! OPTIONS:
//!   Optimizations available:
//!       --aa-eval                - Exhaustive Alias Analysis Precision Evaluator
//!       --adce                   - Aggressive Dead Code Elimination
//!       ...
//! ```
//!
//! Lines after the section header are scanned; each line whose first token
//! starts with `--` contributes that token. The section ends at the first
//! line indented no deeper than the header itself, or at the configured
//! cutoff flag.

use serde::{Deserialize, Serialize};

use crate::error::ToolchainError;

/// How to carve the action vocabulary out of the pass listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Line introducing the pass section.
    pub section_header: String,
    /// Pass-name prefixes (without `--`) to leave out: architecture
    /// specific, diagnostic and printing passes.
    pub excluded_prefixes: Vec<String>,
    /// The listing is truncated before this flag.
    pub cutoff: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let excluded = [
            "amd", "aarch", "arm", "avr", "dot", "falkor", "function-import", "gcn", "help",
            "hexagon", "internalize", "instruction-select", "nvptx", "machine", "metarenamer",
            "mips", "objc", "packets", "ppc", "print", "r600", "regbank", "riscv", "si",
            "slotindexes", "target", "view", "wasm", "x86", "X86",
        ];
        DiscoveryConfig {
            section_header: "Optimizations available".to_string(),
            excluded_prefixes: excluded.iter().map(|p| p.to_string()).collect(),
            cutoff: Some("--bounds-checking-single-trap".to_string()),
        }
    }
}

impl DiscoveryConfig {
    fn is_excluded(&self, flag: &str) -> bool {
        let name = flag.trim_start_matches('-');
        self.excluded_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Extract the ordered flag list from a pass listing.
pub fn parse_pass_listing(listing: &str, config: &DiscoveryConfig) -> Result<Vec<String>, ToolchainError> {
    let start = listing.find(&config.section_header).ok_or_else(|| {
        ToolchainError::DiscoveryFailed(format!(
            "section header '{}' not found",
            config.section_header
        ))
    })?;
    let line_start = listing[..start].rfind('\n').map_or(0, |i| i + 1);
    let header_indent = indentation(&listing[line_start..]);
    let section = &listing[start + config.section_header.len()..];

    let mut flags = Vec::new();
    // The first line is the remainder of the header line itself.
    for line in section.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        if indentation(line) <= header_indent {
            break;
        }
        let token = match line.split_whitespace().next() {
            Some(t) if t.starts_with("--") && t.len() > 2 => t,
            _ => continue,
        };
        if config.cutoff.as_deref() == Some(token) {
            break;
        }
        if config.is_excluded(token) {
            continue;
        }
        flags.push(token.to_string());
    }

    tracing::debug!(count = flags.len(), "parsed pass listing");
    Ok(flags)
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}
