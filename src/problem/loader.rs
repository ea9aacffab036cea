//! Loading problem specs from YAML files.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::RegistryError;

use super::ProblemSpec;

#[derive(Deserialize)]
#[serde(untagged)]
enum ProblemFile {
    Many(Vec<ProblemSpec>),
    One(Box<ProblemSpec>),
}

/// Parses one YAML document holding either a single spec or a list.
pub fn parse_problems(source: &str, origin: &Path) -> Result<Vec<ProblemSpec>, RegistryError> {
    let parsed: ProblemFile = serde_yaml::from_str(source).map_err(|e| RegistryError::Load {
        path: origin.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(match parsed {
        ProblemFile::Many(specs) => specs,
        ProblemFile::One(spec) => vec![*spec],
    })
}

/// Recursively discovers `*.yaml` / `*.yml` files under `dir` in path order.
pub fn discover_problem_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    if !dir.is_dir() {
        return Err(RegistryError::Load {
            path: dir.display().to_string(),
            message: "not a directory".to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RegistryError::Load {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_yaml = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if is_yaml {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Loads every spec found under `dir`, in discovery order.
pub fn load_problems_dir(dir: &Path) -> Result<Vec<ProblemSpec>, RegistryError> {
    let mut specs = Vec::new();
    for path in discover_problem_files(dir)? {
        let source = std::fs::read_to_string(&path)?;
        let loaded = parse_problems(&source, &path)?;
        debug!(path = %path.display(), count = loaded.len(), "Loaded problem file");
        specs.extend(loaded);
    }
    Ok(specs)
}
