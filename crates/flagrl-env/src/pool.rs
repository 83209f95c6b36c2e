//! Opening every program of a source directory.

use std::path::{Path, PathBuf};

use flagrl_toolchain::Toolchain;

use crate::error::EnvError;
use crate::program::{EnvConfig, Program};

/// Open every `*.ll` file directly under `dir`, in file-name order.
///
/// A program whose base fails to build or measure is skipped with a
/// warning; any other error aborts.
pub fn open_programs(dir: &Path, toolchain: &dyn Toolchain, config: &EnvConfig) -> Result<Vec<Program>, EnvError> {
    let mut sources: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| EnvError::io(dir, e))? {
        let path = entry.map_err(|e| EnvError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "ll") {
            sources.push(path);
        }
    }
    sources.sort();

    let mut programs = Vec::with_capacity(sources.len());
    for source in &sources {
        match Program::open(source, toolchain, config) {
            Ok(program) => programs.push(program),
            Err(e) if e.is_step_failure() => {
                tracing::warn!(source = %source.display(), error = %e, "skipping program");
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!(
        dir = %dir.display(),
        found = sources.len(),
        opened = programs.len(),
        "opened programs"
    );
    Ok(programs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagrl_toolchain::ScriptedToolchain;

    #[test]
    fn opens_sorted_and_skips_broken_programs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("b.ll"), "; cost 2.0\n").unwrap();
        std::fs::write(src.join("a.ll"), "; cost 1.0\n").unwrap();
        std::fs::write(src.join("broken.ll"), "; cost 1.0\n; fail-build\n").unwrap();
        std::fs::write(src.join("notes.txt"), "ignored").unwrap();

        let config = EnvConfig {
            work_dir: dir.path().join("build"),
            base_max_age_secs: None,
        };
        let tc = ScriptedToolchain::new(&["--a"]);
        let programs = open_programs(&src, &tc, &config).unwrap();
        let names: Vec<&str> = programs.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let tc = ScriptedToolchain::new(&["--a"]);
        let err = open_programs(&dir.path().join("nope"), &tc, &EnvConfig::default()).unwrap_err();
        assert!(matches!(err, EnvError::Io { .. }));
    }
}
