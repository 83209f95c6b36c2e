//! One source program and the lineage of variants derived from it.
//!
//! A [`Program`] tracks which variant is current (its [`VariantKey`]) and
//! moves it through `Unbuilt -> Built -> Measured`. [`Program::step`]
//! appends one action; [`Program::reset`] goes back to the base program
//! while keeping every cached variant on disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use flagrl_core::{speedup_reward, ActionId, StateVector, VariantKey};
use flagrl_toolchain::{parse_measurement, Toolchain};

use crate::cache::{VariantCache, VariantPaths};
use crate::catalog::ActionCatalog;
use crate::error::EnvError;

/// Environment settings shared by every program in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Root under which each program gets its own cache directory.
    pub work_dir: PathBuf,
    /// Re-measure the base on reset once its measurement is older than
    /// this. `None` keeps the first base measurement for the whole run.
    pub base_max_age_secs: Option<u64>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            work_dir: PathBuf::from("./build/"),
            base_max_age_secs: None,
        }
    }
}

impl EnvConfig {
    fn base_max_age(&self) -> Option<Duration> {
        self.base_max_age_secs.map(Duration::from_secs)
    }
}

/// Lifecycle of the current variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No verified executable yet.
    Unbuilt,
    /// The executable exists but has not been measured.
    Built,
    /// State and cost are known.
    Measured,
}

/// Result of running the measurement harness once.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub state: StateVector,
    pub cost: f64,
    pub taken_at: Instant,
}

/// Tool invocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramStats {
    pub transforms: usize,
    pub builds: usize,
    pub measurements: usize,
    pub transient_retries: usize,
    pub cache_hits: usize,
}

/// A source program plus its current position in the variant tree.
#[derive(Debug)]
pub struct Program {
    name: String,
    source: PathBuf,
    cache: VariantCache,
    config: EnvConfig,
    lineage: VariantKey,
    stage: Stage,
    base: Option<Measurement>,
    current: Option<Measurement>,
    stats: ProgramStats,
}

impl Program {
    /// Open `source`, then build and measure its base variant.
    ///
    /// Step-failure errors here mean the program itself cannot be used
    /// (e.g. it does not compile); callers may skip it.
    pub fn open(source: &Path, toolchain: &dyn Toolchain, config: &EnvConfig) -> Result<Self, EnvError> {
        let invalid = |reason: &str| EnvError::InvalidSource {
            path: source.to_path_buf(),
            reason: reason.to_string(),
        };
        if source.extension().and_then(|e| e.to_str()) != Some("ll") {
            return Err(invalid("expected a .ll file"));
        }
        if !source.is_file() {
            return Err(invalid("no such file"));
        }
        let name = source
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| invalid("file name is not valid UTF-8"))?
            .to_string();

        let cache = VariantCache::open(&config.work_dir.join(&name), &name, source)?;
        let mut program = Program {
            name,
            source: source.to_path_buf(),
            cache,
            config: config.clone(),
            lineage: VariantKey::base(),
            stage: Stage::Unbuilt,
            base: None,
            current: None,
            stats: ProgramStats::default(),
        };
        program.build(toolchain)?;
        program.measure(toolchain)?;
        tracing::debug!(
            program = %program.name,
            cost = program.cost().unwrap_or(f64::NAN),
            cached = program.cache.len(),
            "opened program"
        );
        Ok(program)
    }

    /// Make sure the current variant has a verified executable.
    pub fn build(&mut self, toolchain: &dyn Toolchain) -> Result<(), EnvError> {
        if self.stage != Stage::Unbuilt {
            return Ok(());
        }
        let key = self.lineage.clone();
        self.ensure_built(toolchain, &key, None)?;
        self.stage = Stage::Built;
        Ok(())
    }

    /// Run the measurement harness on the current variant.
    pub fn measure(&mut self, toolchain: &dyn Toolchain) -> Result<Measurement, EnvError> {
        self.build(toolchain)?;
        let key = self.lineage.clone();
        let executable = self.cache.paths(&key).executable;
        let measurement = self.run_measurement(toolchain, &key, &executable)?;
        if key.is_base() {
            self.base = Some(measurement.clone());
        }
        self.current = Some(measurement.clone());
        self.stage = Stage::Measured;
        Ok(measurement)
    }

    /// Apply `action` to the current variant and return the reward
    /// `ln(before / after)`.
    ///
    /// On any error the lineage and the current measurement are unchanged.
    pub fn step(
        &mut self,
        toolchain: &dyn Toolchain,
        catalog: &ActionCatalog,
        action: ActionId,
    ) -> Result<f64, EnvError> {
        let flag = catalog.describe(action)?;
        let measured = self.current.as_ref().filter(|_| self.stage == Stage::Measured);
        let before = match measured.map(|m| m.cost) {
            Some(cost) => cost,
            None => self.measure(toolchain)?.cost,
        };

        let key = self.lineage.extended(action)?;
        let paths = self.ensure_built(toolchain, &key, Some(flag))?;
        let measurement = self.run_measurement(toolchain, &key, &paths.executable)?;
        let reward = speedup_reward(before, measurement.cost).map_err(|_| EnvError::InvalidCost {
            program: self.name.clone(),
            key: key.to_string(),
            before,
            after: measurement.cost,
        })?;

        tracing::debug!(
            program = %self.name,
            key = %key,
            flag,
            before,
            after = measurement.cost,
            reward,
            "step"
        );
        self.lineage = key;
        self.current = Some(measurement);
        self.stage = Stage::Measured;
        Ok(reward)
    }

    /// Point the lineage back at the base program.
    ///
    /// Cached variants stay on disk. The base is measured again only if it
    /// has no measurement or the last one is older than the configured age.
    pub fn reset(&mut self, toolchain: &dyn Toolchain) -> Result<(), EnvError> {
        self.lineage = VariantKey::base();
        let fresh = match (&self.base, self.config.base_max_age()) {
            (Some(_), None) => true,
            (Some(m), Some(max_age)) => m.taken_at.elapsed() <= max_age,
            (None, _) => false,
        };
        if fresh {
            self.current = self.base.clone();
            self.stage = Stage::Measured;
            return Ok(());
        }
        self.current = None;
        self.stage = Stage::Unbuilt;
        self.measure(toolchain)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Key of the current variant.
    pub fn lineage(&self) -> &VariantKey {
        &self.lineage
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// State of the current variant, if measured.
    pub fn state(&self) -> Option<&StateVector> {
        self.current.as_ref().map(|m| &m.state)
    }

    /// Cost of the current variant, if measured.
    pub fn cost(&self) -> Option<f64> {
        self.current.as_ref().map(|m| m.cost)
    }

    pub fn base_cost(&self) -> Option<f64> {
        self.base.as_ref().map(|m| m.cost)
    }

    pub fn current(&self) -> Option<&Measurement> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> ProgramStats {
        self.stats
    }

    pub fn cache(&self) -> &VariantCache {
        &self.cache
    }

    /// Return verified artifacts for `key`, producing them if needed.
    ///
    /// `flag` transforms the current lineage's IR into `key`'s IR first;
    /// without it the IR must already be there.
    fn ensure_built(
        &mut self,
        toolchain: &dyn Toolchain,
        key: &VariantKey,
        flag: Option<&str>,
    ) -> Result<VariantPaths, EnvError> {
        if let Some(paths) = self.cache.lookup(key)? {
            self.stats.cache_hits += 1;
            return Ok(paths);
        }
        let paths = self.cache.paths(key);

        // 1. Transform the parent IR
        if let Some(flag) = flag {
            let parent_ir = self.cache.paths(&self.lineage).ir;
            self.stats.transforms += 1;
            let output = toolchain.transform(flag, &parent_ir, &paths.ir)?;
            if !output.success() {
                return Err(EnvError::OptFailed {
                    program: self.name.clone(),
                    key: key.to_string(),
                    flag: flag.to_string(),
                    detail: output.failure_summary(),
                });
            }
        } else if !paths.ir.is_file() {
            return Err(EnvError::CacheCorrupted {
                path: paths.ir,
                reason: "variant IR missing".to_string(),
            });
        }

        // 2. Compile to an object file in a scratch directory
        let scratch = tempfile::Builder::new()
            .prefix(".obj")
            .tempdir_in(self.cache.dir())
            .map_err(|e| EnvError::io(self.cache.dir(), e))?;
        let object = scratch.path().join(format!("{}.o", self.name));
        self.stats.builds += 1;
        let output = toolchain.compile(&paths.ir, &object)?;
        if !output.success() {
            return Err(self.build_failed(key, output.failure_summary()));
        }

        // 3. Link
        let output = toolchain.link(&object, &paths.executable)?;
        if !output.success() {
            return Err(self.build_failed(key, output.failure_summary()));
        }

        // 4. Record digests
        self.cache.record(key, &paths)?;
        Ok(paths)
    }

    fn build_failed(&self, key: &VariantKey, detail: String) -> EnvError {
        EnvError::BuildFailed {
            program: self.name.clone(),
            key: key.to_string(),
            detail,
        }
    }

    fn run_measurement(
        &mut self,
        toolchain: &dyn Toolchain,
        key: &VariantKey,
        executable: &Path,
    ) -> Result<Measurement, EnvError> {
        let policy = toolchain.transient_policy();
        let failed = |detail: String| EnvError::MeasurementFailed {
            program: self.name.clone(),
            key: key.to_string(),
            detail,
        };

        let mut retries = 0;
        let output = loop {
            let output = toolchain.measure(executable)?;
            if !policy.matches(&output) {
                break output;
            }
            retries += 1;
            tracing::warn!(
                program = %self.name,
                key = %key,
                attempt = retries,
                "transient measurement failure, retrying"
            );
            std::thread::sleep(policy.retry_delay());
        };

        let result = if output.success() {
            parse_measurement(&output, toolchain.measurement_marker())
                .map(|record| Measurement {
                    state: record.state,
                    cost: record.cost,
                    taken_at: Instant::now(),
                })
                .map_err(|e| failed(e.to_string()))
        } else {
            Err(failed(output.failure_summary()))
        };
        self.stats.measurements += retries + 1;
        self.stats.transient_retries += retries;
        result
    }
}
