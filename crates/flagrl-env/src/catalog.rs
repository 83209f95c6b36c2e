//! The action catalog: the fixed, ordered vocabulary of transformation flags.
//!
//! The catalog is loaded once per run and never changes afterwards; the
//! approximator's output size is its length. The first run discovers the
//! vocabulary from the toolchain's pass listing and persists it as a JSON
//! list so later runs (and their trained models) see the same ids.

use std::path::Path;

use indexmap::IndexSet;
use rand::Rng;
use serde::Serialize;

use flagrl_core::{ActionId, CoreError, MAX_ACTIONS};
use flagrl_toolchain::{parse_pass_listing, DiscoveryConfig, Toolchain, ToolchainError};

use crate::error::EnvError;

/// Ordered, duplicate-free list of flags addressed by [`ActionId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionCatalog {
    flags: IndexSet<String>,
}

impl ActionCatalog {
    /// Build a catalog from flags in order; later duplicates are dropped.
    pub fn from_flags<I, S>(flags: I) -> Result<Self, EnvError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let flags: IndexSet<String> = flags.into_iter().map(Into::into).collect();
        if flags.is_empty() {
            return Err(EnvError::EmptyCatalog);
        }
        if flags.len() > MAX_ACTIONS {
            return Err(CoreError::ActionSpaceTooLarge {
                size: flags.len(),
                max: MAX_ACTIONS,
            }
            .into());
        }
        Ok(ActionCatalog { flags })
    }

    /// Discover the vocabulary from the toolchain's pass listing.
    pub fn discover(toolchain: &dyn Toolchain, config: &DiscoveryConfig) -> Result<Self, EnvError> {
        let output = toolchain.describe()?;
        if !output.success() {
            return Err(ToolchainError::DiscoveryFailed(output.failure_summary()).into());
        }
        let flags = parse_pass_listing(&output.stdout, config)?;
        let catalog = ActionCatalog::from_flags(flags)?;
        tracing::info!(actions = catalog.size(), "discovered action catalog");
        Ok(catalog)
    }

    /// Load a persisted catalog.
    ///
    /// Returns `Ok(None)` when the file does not exist. A file that exists
    /// but cannot be read or parsed is reported as corrupt rather than
    /// silently rediscovered.
    pub fn load(path: &Path) -> Result<Option<Self>, EnvError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EnvError::CatalogCorrupted {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        let corrupted = |reason: String| EnvError::CatalogCorrupted {
            path: path.to_path_buf(),
            reason,
        };
        let flags: Vec<String> = serde_json::from_str(&data).map_err(|e| corrupted(e.to_string()))?;
        ActionCatalog::from_flags(flags)
            .map(Some)
            .map_err(|e| corrupted(e.to_string()))
    }

    /// Persist the catalog as a JSON list.
    pub fn save(&self, path: &Path) -> Result<(), EnvError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EnvError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| EnvError::io(path, e))
    }

    /// Load from `path` if present, otherwise discover and persist there.
    pub fn load_or_discover(
        path: &Path,
        toolchain: &dyn Toolchain,
        config: &DiscoveryConfig,
    ) -> Result<Self, EnvError> {
        if let Some(catalog) = ActionCatalog::load(path)? {
            tracing::debug!(path = %path.display(), actions = catalog.size(), "loaded action catalog");
            return Ok(catalog);
        }
        let catalog = ActionCatalog::discover(toolchain, config)?;
        catalog.save(path)?;
        Ok(catalog)
    }

    /// Number of actions N.
    pub fn size(&self) -> usize {
        self.flags.len()
    }

    /// Flag for `id`; `OutOfRange` unless `id < N`.
    pub fn describe(&self, id: ActionId) -> Result<&str, CoreError> {
        self.flags
            .get_index(id.index())
            .map(String::as_str)
            .ok_or(CoreError::OutOfRange {
                id,
                size: self.flags.len(),
            })
    }

    /// Flags for several ids at once.
    pub fn describe_all(&self, ids: &[ActionId]) -> Result<Vec<&str>, CoreError> {
        ids.iter().map(|&id| self.describe(id)).collect()
    }

    /// Uniformly random action in `[0, N)`.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionId {
        ActionId(rng.gen_range(0..self.flags.len()) as u16)
    }

    /// Reverse lookup by flag name.
    pub fn id_of(&self, flag: &str) -> Option<ActionId> {
        self.flags.get_index_of(flag).map(|i| ActionId(i as u16))
    }

    /// Flags in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ActionId, &str)> + '_ {
        self.flags
            .iter()
            .enumerate()
            .map(|(i, f)| (ActionId(i as u16), f.as_str()))
    }
}
