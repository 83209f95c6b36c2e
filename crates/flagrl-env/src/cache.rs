//! On-disk variant cache for one program.
//!
//! Every successfully built variant is recorded in a JSON manifest next to
//! its artifacts, keyed by the variant encoding, with blake3 digests of the
//! IR and the executable. A lookup only reports a hit when both artifacts
//! are present and unchanged. An entry whose artifact was deleted is a miss
//! and gets rebuilt; an artifact that is unreadable or altered is
//! corruption and is reported, never treated as "already built".
//!
//! The manifest also records the digest of the source program. If the
//! source changed since the manifest was written, every derived variant is
//! stale and the manifest starts over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use flagrl_core::VariantKey;

use crate::error::EnvError;

const MANIFEST_FILE: &str = "manifest.json";

/// Artifact locations of one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPaths {
    pub ir: PathBuf,
    pub executable: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Digests {
    ir: String,
    executable: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    source_digest: String,
    /// Encoding -> artifact digests; the base program is the empty encoding.
    entries: BTreeMap<String, Digests>,
}

/// Cache namespace of one program: `<work_dir>/<stem>/`.
#[derive(Debug)]
pub struct VariantCache {
    dir: PathBuf,
    stem: String,
    source: PathBuf,
    manifest: Manifest,
}

impl VariantCache {
    /// Open (creating if needed) the cache directory for `source`.
    pub fn open(dir: &Path, stem: &str, source: &Path) -> Result<Self, EnvError> {
        std::fs::create_dir_all(dir).map_err(|e| EnvError::io(dir, e))?;
        let source_digest = digest_file(source).map_err(|reason| EnvError::InvalidSource {
            path: source.to_path_buf(),
            reason,
        })?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = match std::fs::read_to_string(&manifest_path) {
            Ok(data) => {
                let manifest: Manifest =
                    serde_json::from_str(&data).map_err(|e| EnvError::CacheCorrupted {
                        path: manifest_path.clone(),
                        reason: e.to_string(),
                    })?;
                if manifest.source_digest == source_digest {
                    manifest
                } else {
                    tracing::warn!(
                        program = stem,
                        entries = manifest.entries.len(),
                        "source changed since the cache was written; discarding cached variants"
                    );
                    Manifest {
                        source_digest,
                        entries: BTreeMap::new(),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest {
                source_digest,
                entries: BTreeMap::new(),
            },
            Err(e) => {
                return Err(EnvError::CacheCorrupted {
                    path: manifest_path,
                    reason: e.to_string(),
                })
            }
        };

        Ok(VariantCache {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            source: source.to_path_buf(),
            manifest,
        })
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic artifact paths of `key`, whether built or not.
    pub fn paths(&self, key: &VariantKey) -> VariantPaths {
        let ir = match key.ir_file_name(&self.stem) {
            Some(name) => self.dir.join(name),
            None => self.source.clone(),
        };
        VariantPaths {
            ir,
            executable: self.dir.join(key.executable_file_name(&self.stem)),
        }
    }

    /// Number of recorded variants, base included.
    pub fn len(&self) -> usize {
        self.manifest.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    /// Verified artifact paths of `key`, or `None` if it was never built or
    /// one of its artifacts no longer exists.
    pub fn lookup(&self, key: &VariantKey) -> Result<Option<VariantPaths>, EnvError> {
        let expected = match self.manifest.entries.get(&key.encode()) {
            Some(d) => d,
            None => return Ok(None),
        };
        let paths = self.paths(key);
        for (path, digest) in [(&paths.ir, &expected.ir), (&paths.executable, &expected.executable)] {
            if !verify(path, digest)? {
                tracing::warn!(
                    program = %self.stem,
                    key = %key,
                    path = %path.display(),
                    "cached artifact missing, rebuilding"
                );
                return Ok(None);
            }
        }
        Ok(Some(paths))
    }

    /// Record a freshly built variant and persist the manifest.
    pub fn record(&mut self, key: &VariantKey, paths: &VariantPaths) -> Result<(), EnvError> {
        let corrupted = |path: &Path, reason: String| EnvError::CacheCorrupted {
            path: path.to_path_buf(),
            reason,
        };
        let digests = Digests {
            ir: digest_file(&paths.ir).map_err(|r| corrupted(&paths.ir, r))?,
            executable: digest_file(&paths.executable).map_err(|r| corrupted(&paths.executable, r))?,
        };
        self.manifest.entries.insert(key.encode(), digests);
        self.save()
    }

    fn save(&self) -> Result<(), EnvError> {
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(&path, json).map_err(|e| EnvError::io(path, e))
    }
}

fn digest_file(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// `Ok(false)` when `path` does not exist.
fn verify(path: &Path, expected: &str) -> Result<bool, EnvError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(EnvError::CacheCorrupted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    if blake3::hash(&bytes).to_hex().as_str() != expected {
        return Err(EnvError::CacheCorrupted {
            path: path.to_path_buf(),
            reason: "digest mismatch".to_string(),
        });
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagrl_core::ActionId;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("prog.ll");
        std::fs::write(&source, "; cost 1.0\n").unwrap();
        (dir, source)
    }

    fn key(ids: &[u16]) -> VariantKey {
        VariantKey::from_actions(ids.iter().map(|&i| ActionId(i))).unwrap()
    }

    fn build(cache: &mut VariantCache, k: &VariantKey) -> VariantPaths {
        let paths = cache.paths(k);
        if !k.is_base() {
            std::fs::write(&paths.ir, format!("ir {}", k.encode())).unwrap();
        }
        std::fs::write(&paths.executable, format!("exe {}", k.encode())).unwrap();
        cache.record(k, &paths).unwrap();
        paths
    }

    #[test]
    fn paths_are_derived_from_encoding() {
        let (dir, source) = setup();
        let cache = VariantCache::open(&dir.path().join("prog"), "prog", &source).unwrap();
        let base = cache.paths(&VariantKey::base());
        assert_eq!(base.ir, source);
        assert_eq!(base.executable, dir.path().join("prog").join("prog"));
        let child = cache.paths(&key(&[0, 37]));
        assert_eq!(child.ir, dir.path().join("prog").join("prog_opt_0011.ll"));
        assert_eq!(child.executable, dir.path().join("prog").join("prog_opt_0011"));
    }

    #[test]
    fn unknown_key_misses_recorded_key_hits() {
        let (dir, source) = setup();
        let mut cache = VariantCache::open(&dir.path().join("prog"), "prog", &source).unwrap();
        let k = key(&[1]);
        assert_eq!(cache.lookup(&k).unwrap(), None);
        let paths = build(&mut cache, &k);
        assert_eq!(cache.lookup(&k).unwrap(), Some(paths));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stray_file_without_entry_is_a_miss() {
        let (dir, source) = setup();
        let cache = VariantCache::open(&dir.path().join("prog"), "prog", &source).unwrap();
        let k = key(&[2]);
        std::fs::write(cache.paths(&k).executable, "left over").unwrap();
        assert_eq!(cache.lookup(&k).unwrap(), None);
    }

    #[test]
    fn altered_artifact_is_corruption() {
        let (dir, source) = setup();
        let mut cache = VariantCache::open(&dir.path().join("prog"), "prog", &source).unwrap();
        let k = key(&[3]);
        let paths = build(&mut cache, &k);

        std::fs::write(&paths.executable, "tampered").unwrap();
        assert!(matches!(cache.lookup(&k), Err(EnvError::CacheCorrupted { .. })));
    }

    #[test]
    fn deleted_artifact_is_a_miss_until_rebuilt() {
        let (dir, source) = setup();
        let mut cache = VariantCache::open(&dir.path().join("prog"), "prog", &source).unwrap();
        let k = key(&[3, 8]);
        let paths = build(&mut cache, &k);

        std::fs::remove_file(&paths.ir).unwrap();
        assert_eq!(cache.lookup(&k).unwrap(), None);

        let rebuilt = build(&mut cache, &k);
        assert_eq!(cache.lookup(&k).unwrap(), Some(rebuilt));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn manifest_survives_reopen() {
        let (dir, source) = setup();
        let cache_dir = dir.path().join("prog");
        let k = key(&[4, 5]);
        {
            let mut cache = VariantCache::open(&cache_dir, "prog", &source).unwrap();
            build(&mut cache, &k);
        }
        let reopened = VariantCache::open(&cache_dir, "prog", &source).unwrap();
        assert!(reopened.lookup(&k).unwrap().is_some());
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn changed_source_discards_entries() {
        let (dir, source) = setup();
        let cache_dir = dir.path().join("prog");
        {
            let mut cache = VariantCache::open(&cache_dir, "prog", &source).unwrap();
            build(&mut cache, &key(&[6]));
        }
        std::fs::write(&source, "; cost 2.0\n").unwrap();
        let reopened = VariantCache::open(&cache_dir, "prog", &source).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn corrupt_manifest_fails_loudly() {
        let (dir, source) = setup();
        let cache_dir = dir.path().join("prog");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join(MANIFEST_FILE), "[1, 2").unwrap();
        let err = VariantCache::open(&cache_dir, "prog", &source).unwrap_err();
        assert!(matches!(err, EnvError::CacheCorrupted { .. }));
    }
}
