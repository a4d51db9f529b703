//! Directory scans over persisted JSON rows.

use crate::error::{Result, StateError};
use aether_core::read_versioned_json;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// Lists the `.json` row files directly under `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub(crate) fn row_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StateError::io(format!("reading {}", dir.display()), e)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| StateError::io(format!("reading {}", dir.display()), e))?
            .path();
        let is_row = path.extension().is_some_and(|ext| ext == "json")
            && path
                .file_name()
                .is_some_and(|name| !name.to_string_lossy().starts_with('.'));
        if is_row {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Loads every readable row under `dir`. Unreadable rows are skipped with a warning.
pub(crate) fn load_rows<T: DeserializeOwned>(dir: &Path) -> Result<Vec<(PathBuf, T)>> {
    let mut rows = Vec::new();
    for path in row_paths(dir)? {
        match read_versioned_json::<T>(&path) {
            Ok(Some(row)) => rows.push((path, row)),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping unreadable row {}: {}", path.display(), e),
        }
    }
    Ok(rows)
}

/// Lists subdirectories of `dir` that contain at least one row, sorted by name.
pub(crate) fn populated_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StateError::io(format!("reading {}", dir.display()), e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| StateError::io(format!("reading {}", dir.display()), e))?
            .path();
        if path.is_dir()
            && !row_paths(&path)?.is_empty()
            && let Some(name) = path.file_name()
        {
            names.push(name.to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_row_paths_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.json"), "{}").unwrap();
        fs::write(temp.path().join("a.json"), "{}").unwrap();
        fs::write(temp.path().join(".tmp123.json"), "{}").unwrap();
        fs::write(temp.path().join("notes.txt"), "").unwrap();

        let names: Vec<String> = row_paths(temp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(row_paths(&temp.path().join("absent")).unwrap().is_empty());
        assert!(populated_subdirs(&temp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_load_rows_skips_bad_rows() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("good.json"), r#"{"format_version": 1}"#).unwrap();
        fs::write(temp.path().join("future.json"), r#"{"format_version": 7}"#).unwrap();
        fs::write(temp.path().join("broken.json"), "{").unwrap();

        let rows: Vec<(PathBuf, serde_json::Value)> = load_rows(temp.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].0.ends_with("good.json"));
    }

    #[test]
    fn test_populated_subdirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("empty")).unwrap();
        fs::create_dir_all(temp.path().join("zeta")).unwrap();
        fs::create_dir_all(temp.path().join("alpha")).unwrap();
        fs::write(temp.path().join("zeta").join("k.json"), "{}").unwrap();
        fs::write(temp.path().join("alpha").join("k.json"), "{}").unwrap();

        assert_eq!(populated_subdirs(temp.path()).unwrap(), vec!["alpha", "zeta"]);
    }
}
