//! Store handle shared by every persistence component.
//!
//! A [`StoreHandle`] owns the on-disk root and the configuration. Components
//! receive a clone at construction instead of reaching for a process-wide
//! path, so isolated instances (one per test, for example) never collide.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── catalog.json      # Catalog marker (format version, creation time)
//! ├── snapshots/        # Snapshot content and catalog rows, per plugin
//! ├── state/            # Per-plugin state rows
//! ├── context/          # Per-plugin context records
//! └── shared/           # Shared state, per namespace
//! ```

use crate::config::PersistenceConfig;
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Current catalog format version.
pub const CATALOG_FORMAT_VERSION: &str = "1.0";

/// Name of the catalog marker file at the store root.
pub const CATALOG_FILE: &str = "catalog.json";

/// Directory holding snapshot content and catalog rows.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Directory holding per-plugin state rows.
pub const STATE_DIR: &str = "state";

/// Directory holding context records.
pub const CONTEXT_DIR: &str = "context";

/// Directory holding shared-state entries.
pub const SHARED_DIR: &str = "shared";

#[derive(Debug, Serialize, Deserialize)]
struct CatalogMarker {
    format_version: String,
    created_at: DateTime<Utc>,
    generator_version: String,
}

/// Handle to an opened persistence root.
///
/// Cheap to clone; clones refer to the same root, configuration and lock
/// table. Components that should exclude each other must be built from
/// clones of one handle.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let temp = tempfile::tempdir()?;
/// let handle = StoreHandle::open(PersistenceConfig::with_root(temp.path()))?;
/// assert!(handle.snapshots_dir().exists());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StoreHandle {
    config: Arc<PersistenceConfig>,
    locks: KeyedLocks,
}

impl StoreHandle {
    /// Opens (creating if needed) the persistence root described by `config`.
    ///
    /// # Errors
    ///
    /// * [`Error::ConfigError`] - The configuration is invalid
    /// * [`Error::CatalogCorruption`] - The catalog marker exists but cannot be
    ///   read, parsed, or has an unknown format version
    /// * I/O errors if directories cannot be created
    pub fn open(config: PersistenceConfig) -> Result<Self> {
        config.validate()?;
        let handle = Self {
            config: Arc::new(config),
            locks: KeyedLocks::new(),
        };
        handle.ensure_layout()?;

        let marker_path = handle.catalog_path();
        match fs::read_to_string(&marker_path) {
            Ok(content) => {
                let marker: CatalogMarker =
                    serde_json::from_str(&content).map_err(|e| Error::CatalogCorruption {
                        path: marker_path.clone(),
                        reason: format!("Failed to parse catalog marker: {e}"),
                    })?;
                if marker.format_version != CATALOG_FORMAT_VERSION {
                    return Err(Error::CatalogCorruption {
                        path: marker_path,
                        reason: format!(
                            "Unsupported catalog version: {} (expected {})",
                            marker.format_version, CATALOG_FORMAT_VERSION
                        ),
                    });
                }
                tracing::debug!(
                    "Opened catalog at {} (created {})",
                    handle.root().display(),
                    marker.created_at
                );
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                handle.write_marker()?;
                tracing::info!("Initialized catalog at {}", handle.root().display());
            }
            Err(e) => {
                return Err(Error::CatalogCorruption {
                    path: marker_path,
                    reason: format!("Failed to read catalog marker: {e}"),
                });
            }
        }

        Ok(handle)
    }

    /// Rewrites the catalog marker and opens the root.
    ///
    /// This is the explicit recovery path after [`Error::CatalogCorruption`].
    /// Existing snapshot and state rows are left in place.
    ///
    /// # Errors
    ///
    /// Returns configuration or I/O errors as described in [`open`](Self::open).
    pub fn reinitialize(config: PersistenceConfig) -> Result<Self> {
        config.validate()?;
        let handle = Self {
            config: Arc::new(config),
            locks: KeyedLocks::new(),
        };
        handle.ensure_layout()?;
        handle.write_marker()?;
        tracing::warn!("Reinitialized catalog at {}", handle.root().display());
        Ok(handle)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root().to_path_buf(),
            self.snapshots_dir(),
            self.state_dir(),
            self.context_dir(),
            self.shared_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }

    fn write_marker(&self) -> Result<()> {
        let marker = CatalogMarker {
            format_version: CATALOG_FORMAT_VERSION.to_string(),
            created_at: Utc::now(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_json_atomic(&self.catalog_path(), &marker)
    }

    /// Returns the configuration this handle was opened with.
    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Returns the lock table shared by every component on this handle.
    #[must_use]
    pub const fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Returns the persistence root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root_dir
    }

    /// Returns the catalog marker path.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.root().join(CATALOG_FILE)
    }

    /// Returns the snapshots directory.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root().join(SNAPSHOTS_DIR)
    }

    /// Returns the state directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root().join(STATE_DIR)
    }

    /// Returns the context directory.
    #[must_use]
    pub fn context_dir(&self) -> PathBuf {
        self.root().join(CONTEXT_DIR)
    }

    /// Returns the shared-state directory.
    #[must_use]
    pub fn shared_dir(&self) -> PathBuf {
        self.root().join(SHARED_DIR)
    }
}

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
///
/// The document is written to a temporary file in the same directory, synced,
/// then renamed over `path`, so readers see either the old or the new row.
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns a serialization error or an I/O error.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;

    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| Error::io(format!("creating temp file in {}", parent.display()), e))?;
    tmp.write_all(&json)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::io(format!("writing {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| Error::io(format!("replacing {}", path.display()), e.error))?;
    Ok(())
}

/// Reads and parses a JSON row, returning `None` if the file does not exist.
///
/// # Errors
///
/// Returns an I/O error for read failures other than "not found", or a
/// serialization error if the content is not a valid row.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(format!("reading {}", path.display()), e)),
    }
}

/// Removes a file, treating "not found" as success.
///
/// Returns `true` if a file was removed.
///
/// # Errors
///
/// Returns an I/O error for any other failure.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(format!("removing {}", path.display()), e)),
    }
}

/// Total size in bytes of the regular files under `dir`; 0 if it does not exist.
#[must_use]
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
