//! Deterministic in-process toolchain.
//!
//! [`ScriptedToolchain`] works on real files but never spawns a process.
//! "IR" is a text file whose comment lines describe how the program
//! behaves:
//!
//! ```text
//! ; cost 10.0            base execution cost
//! ; factor --licm 0.25   per-program cost factor for one flag (optional)
//! ; fail-build           compile step fails (optional)
//! ```
//!
//! Transforming appends `; applied <flag>`; measuring multiplies the base
//! cost by the factor of every applied flag (per-program factor first,
//! then the toolchain-wide factor, else 1.0). Invocation counters make
//! memoization observable.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::TransientPolicy;
use crate::error::ToolchainError;
use crate::measure::MEASUREMENT_MARKER;
use crate::process::ToolOutput;
use crate::toolchain::Toolchain;

/// Toolchain that simulates compile, transform and measure in-process.
#[derive(Debug)]
pub struct ScriptedToolchain {
    flags: Vec<String>,
    factors: HashMap<String, f64>,
    failing_flags: HashSet<String>,
    failing_measurements: HashSet<String>,
    transient_remaining: AtomicUsize,
    policy: TransientPolicy,
    transforms: AtomicUsize,
    compiles: AtomicUsize,
    links: AtomicUsize,
    measures: AtomicUsize,
}

impl ScriptedToolchain {
    /// A toolchain advertising `flags` in its pass listing.
    pub fn new(flags: &[&str]) -> Self {
        ScriptedToolchain {
            flags: flags.iter().map(|f| f.to_string()).collect(),
            factors: HashMap::new(),
            failing_flags: HashSet::new(),
            failing_measurements: HashSet::new(),
            transient_remaining: AtomicUsize::new(0),
            policy: TransientPolicy {
                retry_delay_ms: 0,
                ..TransientPolicy::default()
            },
            transforms: AtomicUsize::new(0),
            compiles: AtomicUsize::new(0),
            links: AtomicUsize::new(0),
            measures: AtomicUsize::new(0),
        }
    }

    /// Every program's cost is multiplied by `factor` when `flag` is applied.
    pub fn with_factor(mut self, flag: &str, factor: f64) -> Self {
        self.factors.insert(flag.to_string(), factor);
        self
    }

    /// Transforming with `flag` exits nonzero.
    pub fn with_failing_flag(mut self, flag: &str) -> Self {
        self.failing_flags.insert(flag.to_string());
        self
    }

    /// Measuring any variant with `flag` applied exits nonzero.
    pub fn with_failing_measurement(mut self, flag: &str) -> Self {
        self.failing_measurements.insert(flag.to_string());
        self
    }

    /// The next `count` measurements report the transient ENOMEM status.
    pub fn with_transient_measurements(self, count: usize) -> Self {
        self.transient_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn transform_calls(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }

    pub fn compile_calls(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }

    pub fn measure_calls(&self) -> usize {
        self.measures.load(Ordering::SeqCst)
    }

    fn cost_of(&self, ir: &str) -> Result<f64, String> {
        let mut base = None;
        let mut local: HashMap<&str, f64> = HashMap::new();
        let mut applied = Vec::new();

        for line in ir.lines() {
            let words: Vec<&str> = line.trim_start_matches(';').split_whitespace().collect();
            match words.as_slice() {
                ["cost", value] => {
                    base = Some(value.parse::<f64>().map_err(|e| e.to_string())?);
                }
                ["factor", flag, value] => {
                    local.insert(*flag, value.parse::<f64>().map_err(|e| e.to_string())?);
                }
                ["applied", flag] => applied.push(*flag),
                _ => {}
            }
        }

        let mut cost = base.ok_or_else(|| "no '; cost' line".to_string())?;
        for flag in applied {
            let factor = local
                .get(flag)
                .or_else(|| self.factors.get(flag))
                .copied()
                .unwrap_or(1.0);
            cost *= factor;
        }
        Ok(cost)
    }
}

fn read(path: &Path) -> Result<String, ToolchainError> {
    std::fs::read_to_string(path).map_err(|source| ToolchainError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<(), ToolchainError> {
    std::fs::write(path, contents).map_err(|source| ToolchainError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Toolchain for ScriptedToolchain {
    fn compile(&self, ir: &Path, object: &Path) -> Result<ToolOutput, ToolchainError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let text = read(ir)?;
        if text.lines().any(|l| l.trim() == "; fail-build") {
            return Ok(ToolOutput::exited(1, "", "scripted build failure"));
        }
        write(object, &text)?;
        Ok(ToolOutput::ok(""))
    }

    fn link(&self, object: &Path, executable: &Path) -> Result<ToolOutput, ToolchainError> {
        self.links.fetch_add(1, Ordering::SeqCst);
        let text = read(object)?;
        write(executable, &text)?;
        Ok(ToolOutput::ok(""))
    }

    fn transform(&self, flag: &str, input: &Path, output: &Path) -> Result<ToolOutput, ToolchainError> {
        self.transforms.fetch_add(1, Ordering::SeqCst);
        if self.failing_flags.contains(flag) {
            return Ok(ToolOutput::exited(1, "", &format!("opt: unknown pass {}", flag)));
        }
        let mut text = read(input)?;
        if !text.ends_with('\n') && !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("; applied {}\n", flag));
        write(output, &text)?;
        Ok(ToolOutput::ok(""))
    }

    fn measure(&self, executable: &Path) -> Result<ToolOutput, ToolchainError> {
        self.measures.fetch_add(1, Ordering::SeqCst);
        let transient = self
            .transient_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Ok(ToolOutput::exited(12, "", "time: cannot fork: Cannot allocate memory"));
        }

        let text = read(executable)?;
        let applied: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("; applied "))
            .collect();
        if applied.iter().any(|f| self.failing_measurements.contains(*f)) {
            return Ok(ToolOutput::exited(139, "", "Segmentation fault"));
        }

        let cost = match self.cost_of(&text) {
            Ok(c) => c,
            Err(reason) => return Ok(ToolOutput::exited(2, "", &reason)),
        };
        let record = format!(
            "{marker}{applied} {bytes} {cost} 0{marker}",
            marker = MEASUREMENT_MARKER,
            applied = applied.len(),
            bytes = text.len(),
            cost = cost,
        );
        Ok(ToolOutput::exited(0, "", &record))
    }

    fn describe(&self) -> Result<ToolOutput, ToolchainError> {
        let mut listing = String::from("OVERVIEW: scripted optimizer\n\nOPTIONS:\n  Optimizations available:\n");
        for flag in &self.flags {
            listing.push_str(&format!("      {:<30} - scripted pass\n", flag));
        }
        listing.push_str("  Generic Options:\n      --help - Display available options\n");
        Ok(ToolOutput::ok(&listing))
    }

    fn transient_policy(&self) -> &TransientPolicy {
        &self.policy
    }
}
