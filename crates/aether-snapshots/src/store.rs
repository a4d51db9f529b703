//! Snapshot storage implementation.
//!
//! Provides the main [`SnapshotStore`] type for recording, listing, and
//! reading immutable snapshots of plugin source.

use crate::checksum::{calculate_checksum, verify_checksum};
use crate::error::{Result, SnapshotError};
use crate::syntax::{DelimiterCheck, SyntaxCheck};
use crate::types::{
    Annotation, FORMAT_VERSION, HistoryStats, NewSnapshot, ROW_EXTENSION, SizeTrend, Snapshot,
};
use aether_core::{
    AuditEvent, AuditEventKind, AuditSink, LockScope, StoreHandle, TracingAuditSink,
    remove_file_if_exists, validate_name, write_json_atomic,
};
use chrono::{Duration, Utc};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on disambiguators tried for one microsecond timestamp.
const MAX_COLLISIONS: u32 = 10_000;

/// RAII guard for a content file being written.
///
/// Removes the file on drop unless [`commit`](Self::commit) is called, so a
/// failed or panicking write never leaves a truncated snapshot behind.
struct ContentFileGuard {
    path: PathBuf,
    cleanup: bool,
}

impl ContentFileGuard {
    const fn new(path: PathBuf) -> Self {
        Self {
            path,
            cleanup: true,
        }
    }

    /// Marks the content as fully written.
    fn commit(mut self) {
        self.cleanup = false;
    }
}

impl Drop for ContentFileGuard {
    fn drop(&mut self) {
        if self.cleanup {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(
                    "Failed to clean up partial snapshot {}: {}",
                    self.path.display(),
                    e
                );
            } else {
                tracing::debug!("Cleaned up partial snapshot: {}", self.path.display());
            }
        }
    }
}

/// Snapshot storage manager.
///
/// Each plugin has its own directory under `<root>/snapshots/`. A snapshot is
/// a content file plus a JSON catalog row with the same stem:
///
/// ```text
/// snapshots/
/// └── greeter/
///     ├── 20261017_093015_123456.aether
///     ├── 20261017_093015_123456.json
///     ├── 20261017_101500_000042.aether
///     └── 20261017_101500_000042.json
/// ```
///
/// # Thread Safety
///
/// `SnapshotStore` is `Send + Sync`. Writes are serialized per plugin name;
/// clones share the same lock table.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
/// use aether_snapshots::SnapshotStore;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let store = SnapshotStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
///
/// let snapshot = store.create_snapshot("greeter", "def run(): return 'hi'", 0.9, "user", "init")?;
/// assert!(snapshot.syntax_valid);
///
/// let history = store.list_snapshots("greeter")?;
/// assert_eq!(history.len(), 1);
/// assert_eq!(store.read_content("greeter", &snapshot.timestamp_id)?, "def run(): return 'hi'");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SnapshotStore {
    handle: StoreHandle,
    checker: Arc<dyn SyntaxCheck>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("root", &self.handle.snapshots_dir())
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Creates a snapshot store on an opened handle, using [`DelimiterCheck`]
    /// and reporting to [`TracingAuditSink`].
    ///
    /// Stores built from clones of one handle share its lock table, so they
    /// never interleave mutations of the same plugin.
    #[must_use]
    pub fn new(handle: StoreHandle) -> Self {
        Self {
            handle,
            checker: Arc::new(DelimiterCheck),
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Replaces the syntax checker.
    #[must_use]
    pub fn with_syntax_check(mut self, checker: impl SyntaxCheck + 'static) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    /// Replaces the audit sink receiving snapshot and rollback events.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Returns the store handle.
    #[must_use]
    pub const fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Records a snapshot of `content`.
    ///
    /// Runs the syntax check first; a failure is logged and recorded as
    /// `syntax_valid = false` but does not prevent the snapshot.
    ///
    /// # Errors
    ///
    /// * [`SnapshotError::InvalidConfidence`] - Confidence outside `0.0..=1.0`
    /// * Invalid plugin name
    /// * I/O errors writing the content file or catalog row. If the content
    ///   was written but the row was not, the content file is left in place
    ///   and reported by [`find_orphaned_content`](Self::find_orphaned_content).
    pub fn create_snapshot(
        &self,
        plugin_name: &str,
        content: &str,
        confidence: f64,
        created_by: &str,
        description: &str,
    ) -> Result<Snapshot> {
        self.create_snapshot_with(
            plugin_name,
            content,
            NewSnapshot::new(confidence, created_by, description),
        )
    }

    /// Records a snapshot with explicit metadata.
    ///
    /// # Errors
    ///
    /// Same as [`create_snapshot`](Self::create_snapshot).
    pub fn create_snapshot_with(
        &self,
        plugin_name: &str,
        content: &str,
        request: NewSnapshot,
    ) -> Result<Snapshot> {
        validate_name("plugin name", plugin_name)?;
        validate_confidence(request.confidence)?;

        let snapshot =
            self.with_plugin_lock(plugin_name, || self.create_locked(plugin_name, content, request))?;
        self.emit_created(&snapshot);
        Ok(snapshot)
    }

    /// Creates a snapshot; the caller must hold the plugin lock.
    pub(crate) fn create_locked(
        &self,
        plugin_name: &str,
        content: &str,
        request: NewSnapshot,
    ) -> Result<Snapshot> {
        let plugin_dir = self.plugin_dir(plugin_name);
        fs::create_dir_all(&plugin_dir)
            .map_err(|e| SnapshotError::io(format!("creating {}", plugin_dir.display()), e))?;

        let syntax_error = self.checker.check(content).err();
        if let Some(reason) = &syntax_error {
            tracing::warn!("Snapshot of {} failed syntax check: {}", plugin_name, reason);
        }

        let created_at = Utc::now();
        let base_id = created_at.format("%Y%m%d_%H%M%S_%6f").to_string();
        let (timestamp_id, sequence, mut file, content_path) =
            self.reserve_content_file(&plugin_dir, &base_id)?;

        let guard = ContentFileGuard::new(content_path.clone());
        file.write_all(content.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| SnapshotError::io(format!("writing {}", content_path.display()), e))?;
        drop(file);
        guard.commit();
        tracing::debug!("Wrote snapshot content: {} bytes", content.len());

        let content_file = content_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let snapshot = Snapshot {
            format_version: FORMAT_VERSION.to_string(),
            plugin_name: plugin_name.to_string(),
            timestamp_id,
            content_file,
            confidence: request.confidence,
            size: content.len() as u64,
            syntax_valid: syntax_error.is_none(),
            syntax_error,
            created_by: request.created_by,
            description: request.description,
            metadata: request.metadata,
            created_at,
            sequence,
            checksum: calculate_checksum(content.as_bytes()),
            annotations: Vec::new(),
        };

        let row_path = self.row_path(plugin_name, &snapshot.timestamp_id);
        write_json_atomic(&row_path, &snapshot).inspect_err(|e| {
            tracing::error!(
                "Catalog insert failed for {}@{}; content {} is orphaned: {}",
                plugin_name,
                snapshot.timestamp_id,
                content_path.display(),
                e
            );
        })?;

        tracing::info!(
            "Created snapshot {}@{} ({} bytes, confidence {:.2})",
            plugin_name,
            snapshot.timestamp_id,
            snapshot.size,
            snapshot.confidence
        );
        Ok(snapshot)
    }

    /// Exclusively creates the content file for a new snapshot id.
    ///
    /// Tries `base_id`, then `base_id_1`, `base_id_2`, ... until neither the
    /// content file nor a catalog row with that id exists.
    fn reserve_content_file(
        &self,
        plugin_dir: &Path,
        base_id: &str,
    ) -> Result<(String, u32, File, PathBuf)> {
        let extension = &self.handle.config().source_extension;

        for sequence in 0..MAX_COLLISIONS {
            let timestamp_id = if sequence == 0 {
                base_id.to_string()
            } else {
                format!("{base_id}_{sequence}")
            };

            if plugin_dir.join(format!("{timestamp_id}.{ROW_EXTENSION}")).exists() {
                continue;
            }

            let path = plugin_dir.join(format!("{timestamp_id}.{extension}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((timestamp_id, sequence, file, path)),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(SnapshotError::io(format!("creating {}", path.display()), e));
                }
            }
        }

        Err(SnapshotError::io(
            format!("reserving a snapshot id for {base_id}"),
            std::io::Error::new(IoErrorKind::AlreadyExists, "too many snapshot id collisions"),
        ))
    }

    /// Lists a plugin's snapshots, newest first.
    ///
    /// Unreadable catalog rows are skipped with a warning. A plugin with no
    /// snapshots yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid plugin name or if the plugin directory
    /// cannot be read.
    pub fn list_snapshots(&self, plugin_name: &str) -> Result<Vec<Snapshot>> {
        validate_name("plugin name", plugin_name)?;
        let plugin_dir = self.plugin_dir(plugin_name);

        let entries = match fs::read_dir(&plugin_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SnapshotError::io(format!("reading {}", plugin_dir.display()), e));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SnapshotError::io(format!("reading {}", plugin_dir.display()), e))?
                .path();
            if !is_row_file(&path) {
                continue;
            }

            match load_row(&path) {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable catalog row {}: {}", path.display(), e),
            }
        }

        sort_newest_first(&mut snapshots);
        Ok(snapshots)
    }

    /// Returns the catalog row of one snapshot.
    ///
    /// # Errors
    ///
    /// * [`SnapshotError::SnapshotNotFound`] - No such row
    /// * [`SnapshotError::InvalidRecord`] - The row is malformed
    pub fn get_snapshot(&self, plugin_name: &str, timestamp_id: &str) -> Result<Snapshot> {
        validate_name("plugin name", plugin_name)?;
        validate_name("timestamp id", timestamp_id)?;

        load_row(&self.row_path(plugin_name, timestamp_id))?.ok_or_else(|| {
            SnapshotError::SnapshotNotFound {
                plugin_name: plugin_name.to_string(),
                timestamp_id: timestamp_id.to_string(),
            }
        })
    }

    /// Reads a snapshot's content, verifying its checksum.
    ///
    /// # Errors
    ///
    /// * [`SnapshotError::SnapshotNotFound`] - No such row
    /// * [`SnapshotError::ChecksumMismatch`] - The content file was altered
    /// * [`SnapshotError::InvalidRecord`] - The content file is missing or not UTF-8
    pub fn read_content(&self, plugin_name: &str, timestamp_id: &str) -> Result<String> {
        let snapshot = self.get_snapshot(plugin_name, timestamp_id)?;
        self.read_snapshot_content(&snapshot)
    }

    /// Reads the content of an already loaded catalog row.
    ///
    /// # Errors
    ///
    /// Same as [`read_content`](Self::read_content), minus the lookup.
    pub fn read_snapshot_content(&self, snapshot: &Snapshot) -> Result<String> {
        let path = self.content_path(snapshot);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(SnapshotError::InvalidRecord {
                    path,
                    reason: "content file is missing".to_string(),
                });
            }
            Err(e) => return Err(SnapshotError::io(format!("reading {}", path.display()), e)),
        };

        verify_checksum(&bytes, &snapshot.checksum, &snapshot.content_file)?;

        String::from_utf8(bytes).map_err(|e| SnapshotError::InvalidRecord {
            path,
            reason: format!("content is not valid UTF-8: {e}"),
        })
    }

    /// Appends an annotation to a snapshot's catalog row.
    ///
    /// The content file is never touched.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::SnapshotNotFound`] or I/O errors.
    pub fn annotate(
        &self,
        plugin_name: &str,
        timestamp_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Snapshot> {
        validate_name("plugin name", plugin_name)?;
        validate_name("timestamp id", timestamp_id)?;
        self.with_plugin_lock(plugin_name, || {
            self.annotate_locked(plugin_name, timestamp_id, key, value)
        })
    }

    /// Appends an annotation; the caller must hold the plugin lock.
    pub(crate) fn annotate_locked(
        &self,
        plugin_name: &str,
        timestamp_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Snapshot> {
        let row_path = self.row_path(plugin_name, timestamp_id);
        let mut snapshot = load_row(&row_path)?.ok_or_else(|| SnapshotError::SnapshotNotFound {
            plugin_name: plugin_name.to_string(),
            timestamp_id: timestamp_id.to_string(),
        })?;

        snapshot.annotations.push(Annotation {
            key: key.to_string(),
            value,
            at: Utc::now(),
        });
        write_json_atomic(&row_path, &snapshot)?;
        tracing::debug!("Annotated {}@{} with {}", plugin_name, timestamp_id, key);
        Ok(snapshot)
    }

    /// Deletes a snapshot's content file, then its row; the caller must hold
    /// the plugin lock.
    ///
    /// Returns `false` if the row no longer exists. If the content file cannot
    /// be removed the row is kept and the error returned.
    pub(crate) fn remove_locked(&self, plugin_name: &str, timestamp_id: &str) -> Result<bool> {
        let row_path = self.row_path(plugin_name, timestamp_id);
        let Some(snapshot) = load_row(&row_path)? else {
            return Ok(false);
        };

        remove_file_if_exists(&self.content_path(&snapshot))?;
        remove_file_if_exists(&row_path)?;
        tracing::debug!("Removed snapshot {}@{}", plugin_name, timestamp_id);
        Ok(true)
    }

    /// Computes statistics over a plugin's history.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`list_snapshots`](Self::list_snapshots).
    #[allow(clippy::cast_precision_loss)]
    pub fn get_history_stats(&self, plugin_name: &str) -> Result<HistoryStats> {
        let snapshots = self.list_snapshots(plugin_name)?;

        let (Some(newest), Some(oldest)) = (snapshots.first(), snapshots.last()) else {
            return Ok(HistoryStats {
                total: 0,
                confidence_avg: 0.0,
                confidence_min: 0.0,
                confidence_max: 0.0,
                recent_count: 0,
                size_trend: SizeTrend::Insufficient,
                latest: None,
                oldest: None,
            });
        };

        let total = snapshots.len();
        let confidence_sum: f64 = snapshots.iter().map(|s| s.confidence).sum();
        let confidence_min = snapshots.iter().map(|s| s.confidence).fold(f64::INFINITY, f64::min);
        let confidence_max = snapshots
            .iter()
            .map(|s| s.confidence)
            .fold(f64::NEG_INFINITY, f64::max);

        let cutoff = Duration::try_days(self.handle.config().recent_window_days)
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let recent_count = snapshots
            .iter()
            .filter(|s| cutoff.is_none_or(|cutoff| s.created_at >= cutoff))
            .count();

        let size_trend = if total < 2 {
            SizeTrend::Insufficient
        } else {
            match newest.size.cmp(&oldest.size) {
                std::cmp::Ordering::Greater => SizeTrend::Increasing,
                std::cmp::Ordering::Less => SizeTrend::Decreasing,
                std::cmp::Ordering::Equal => SizeTrend::Stable,
            }
        };

        Ok(HistoryStats {
            total,
            confidence_avg: confidence_sum / total as f64,
            confidence_min,
            confidence_max,
            recent_count,
            size_trend,
            latest: Some(newest.timestamp_id.clone()),
            oldest: Some(oldest.timestamp_id.clone()),
        })
    }

    /// Lists plugins that have at least one snapshot, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the snapshots directory cannot be read.
    pub fn list_plugins(&self) -> Result<Vec<String>> {
        let root = self.handle.snapshots_dir();
        let mut plugins = Vec::new();

        for entry in fs::read_dir(&root)
            .map_err(|e| SnapshotError::io(format!("reading {}", root.display()), e))?
        {
            let path = entry
                .map_err(|e| SnapshotError::io(format!("reading {}", root.display()), e))?
                .path();
            if !path.is_dir() {
                continue;
            }

            let has_rows = fs::read_dir(&path)
                .map(|entries| entries.filter_map(std::result::Result::ok).any(|e| is_row_file(&e.path())))
                .unwrap_or(false);
            if has_rows && let Some(name) = path.file_name() {
                plugins.push(name.to_string_lossy().into_owned());
            }
        }

        plugins.sort();
        Ok(plugins)
    }

    /// Lists content files that have no catalog row.
    ///
    /// These are left behind when a catalog insert fails after the content
    /// was written. Nothing is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid plugin name or unreadable directory.
    pub fn find_orphaned_content(&self, plugin_name: &str) -> Result<Vec<PathBuf>> {
        validate_name("plugin name", plugin_name)?;
        let plugin_dir = self.plugin_dir(plugin_name);

        let entries = match fs::read_dir(&plugin_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SnapshotError::io(format!("reading {}", plugin_dir.display()), e));
            }
        };

        let mut orphans: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && !is_row_file(path) && !is_hidden(path))
            .filter(|path| !path.with_extension(ROW_EXTENSION).exists())
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Deletes the content files reported by
    /// [`find_orphaned_content`](Self::find_orphaned_content).
    ///
    /// Only runs when called; no other operation removes orphans.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error encountered.
    pub fn remove_orphaned_content(&self, plugin_name: &str) -> Result<Vec<PathBuf>> {
        self.with_plugin_lock(plugin_name, || {
            let orphans = self.find_orphaned_content(plugin_name)?;
            for path in &orphans {
                remove_file_if_exists(path)?;
                tracing::info!("Removed orphaned snapshot content: {}", path.display());
            }
            Ok(orphans)
        })
    }

    /// Gets the snapshot directory of a plugin. Does not check that it exists.
    #[must_use]
    pub fn plugin_dir(&self, plugin_name: &str) -> PathBuf {
        self.handle.snapshots_dir().join(plugin_name)
    }

    /// Gets the content file path of a snapshot.
    #[must_use]
    pub fn content_path(&self, snapshot: &Snapshot) -> PathBuf {
        self.plugin_dir(&snapshot.plugin_name).join(&snapshot.content_file)
    }

    fn row_path(&self, plugin_name: &str, timestamp_id: &str) -> PathBuf {
        self.plugin_dir(plugin_name)
            .join(format!("{timestamp_id}.{ROW_EXTENSION}"))
    }

    /// Runs `f` holding the snapshot lock of `plugin_name`. Not reentrant.
    pub(crate) fn with_plugin_lock<T>(&self, plugin_name: &str, f: impl FnOnce() -> T) -> T {
        self.handle
            .locks()
            .with_scoped_lock(LockScope::Snapshots, plugin_name, f)
    }

    pub(crate) fn emit(&self, event: AuditEvent) {
        self.audit.record(&event);
    }

    pub(crate) fn emit_created(&self, snapshot: &Snapshot) {
        self.emit(AuditEvent::new(
            AuditEventKind::SnapshotCreated,
            &snapshot.plugin_name,
            Some(snapshot.timestamp_id.clone()),
            format!("{} by {}", snapshot.description, snapshot.created_by),
        ));
    }
}

fn validate_confidence(value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SnapshotError::InvalidConfidence { value })
    }
}

fn is_row_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ROW_EXTENSION) && !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Reads and parses a catalog row; `None` if the row does not exist.
fn load_row(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SnapshotError::io(format!("reading {}", path.display()), e)),
    };

    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::InvalidRecord {
            path: path.to_path_buf(),
            reason: format!("Failed to parse JSON: {e}"),
        })?;

    if snapshot.format_version != FORMAT_VERSION {
        return Err(SnapshotError::InvalidRecord {
            path: path.to_path_buf(),
            reason: format!(
                "Unsupported format version: {} (expected {})",
                snapshot.format_version, FORMAT_VERSION
            ),
        });
    }

    Ok(Some(snapshot))
}

pub(crate) fn sort_newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::{MemoryAuditSink, PersistenceConfig};
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SnapshotStore {
        let handle = StoreHandle::open(PersistenceConfig::with_root(temp.path())).unwrap();
        SnapshotStore::new(handle)
    }

    #[test]
    fn test_create_writes_content_and_row() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let snapshot = store
            .create_snapshot("greeter", "def run(): return 'hi'", 0.9, "user", "init")
            .unwrap();

        assert_eq!(snapshot.plugin_name, "greeter");
        assert_eq!(snapshot.size, 22);
        assert!(snapshot.syntax_valid);
        assert!(snapshot.content_file.ends_with(".aether"));
        assert!(store.content_path(&snapshot).exists());
        assert!(store.row_path("greeter", &snapshot.timestamp_id).exists());
    }

    #[test]
    fn test_invalid_syntax_is_recorded_not_raised() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let snapshot = store
            .create_snapshot("greeter", "def run(: return", 0.2, "ai", "broken edit")
            .unwrap();

        assert!(!snapshot.syntax_valid);
        assert!(snapshot.syntax_error.as_deref().unwrap().contains("unclosed"));
    }

    #[test]
    fn test_custom_syntax_check() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp).with_syntax_check(|content: &str| {
            if content.contains("TODO") {
                Err("unfinished".to_string())
            } else {
                Ok(())
            }
        });

        let snapshot = store.create_snapshot("p", "TODO", 0.5, "u", "d").unwrap();
        assert!(!snapshot.syntax_valid);
    }

    #[test]
    fn test_confidence_is_validated() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        for value in [-0.1, 1.5, f64::NAN, f64::INFINITY] {
            let result = store.create_snapshot("p", "x", value, "u", "d");
            assert!(matches!(result, Err(SnapshotError::InvalidConfidence { .. })));
        }
        assert!(store.list_snapshots("p").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_plugin_name_rejected() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(store.create_snapshot("../evil", "x", 0.5, "u", "d").is_err());
        assert!(store.get_snapshot("greeter", "../../catalog").is_err());
    }

    #[test]
    fn test_timestamp_collisions_get_disambiguated() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let plugin_dir = store.plugin_dir("greeter");
        fs::create_dir_all(&plugin_dir).unwrap();

        let (first, seq0, _, _) = store.reserve_content_file(&plugin_dir, "20260101_000000_000000").unwrap();
        let (second, seq1, _, _) = store.reserve_content_file(&plugin_dir, "20260101_000000_000000").unwrap();

        assert_eq!(first, "20260101_000000_000000");
        assert_eq!(seq0, 0);
        assert_eq!(second, "20260101_000000_000000_1");
        assert_eq!(seq1, 1);
    }

    #[test]
    fn test_list_is_newest_first_and_unique() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let ids: Vec<String> = (0..5)
            .map(|n| {
                store
                    .create_snapshot("greeter", &format!("v = {n}"), 0.5, "u", "d")
                    .unwrap()
                    .timestamp_id
            })
            .collect();

        let listed: Vec<String> = store
            .list_snapshots("greeter")
            .unwrap()
            .into_iter()
            .map(|s| s.timestamp_id)
            .collect();

        let mut expected = ids;
        expected.reverse();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_list_unknown_plugin_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(store(&temp).list_snapshots("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_row_is_skipped_in_listing() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create_snapshot("greeter", "a = 1", 0.5, "u", "d").unwrap();
        fs::write(store.plugin_dir("greeter").join("garbage.json"), "{").unwrap();

        assert_eq!(store.list_snapshots("greeter").unwrap().len(), 1);
        assert!(matches!(
            store.get_snapshot("greeter", "garbage"),
            Err(SnapshotError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_tampered_content_fails_checksum() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let snapshot = store.create_snapshot("greeter", "a = 1", 0.5, "u", "d").unwrap();

        fs::write(store.content_path(&snapshot), "a = 2").unwrap();
        let result = store.read_content("greeter", &snapshot.timestamp_id);
        assert!(matches!(result, Err(SnapshotError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_annotate_appends_without_touching_content() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let snapshot = store.create_snapshot("greeter", "a = 1", 0.5, "u", "d").unwrap();

        store
            .annotate("greeter", &snapshot.timestamp_id, "reviewed", serde_json::json!(true))
            .unwrap();
        let updated = store
            .annotate("greeter", &snapshot.timestamp_id, "reviewed", serde_json::json!(false))
            .unwrap();

        assert_eq!(updated.annotations.len(), 2);
        assert_eq!(updated.checksum, snapshot.checksum);
        assert_eq!(store.read_content("greeter", &snapshot.timestamp_id).unwrap(), "a = 1");
    }

    #[test]
    fn test_history_stats() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let empty = store.get_history_stats("greeter").unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.size_trend, SizeTrend::Insufficient);

        store.create_snapshot("greeter", "a", 0.4, "u", "d").unwrap();
        store.create_snapshot("greeter", "abc", 0.8, "u", "d").unwrap();

        let stats = store.get_history_stats("greeter").unwrap();
        assert_eq!(stats.total, 2);
        assert!((stats.confidence_avg - 0.6).abs() < 1e-9);
        assert!((stats.confidence_min - 0.4).abs() < 1e-9);
        assert!((stats.confidence_max - 0.8).abs() < 1e-9);
        assert_eq!(stats.recent_count, 2);
        assert_eq!(stats.size_trend, SizeTrend::Increasing);
    }

    #[test]
    fn test_list_plugins() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create_snapshot("weather", "a", 0.5, "u", "d").unwrap();
        store.create_snapshot("greeter", "a", 0.5, "u", "d").unwrap();
        fs::create_dir_all(store.plugin_dir("empty")).unwrap();

        assert_eq!(store.list_plugins().unwrap(), vec!["greeter", "weather"]);
    }

    #[test]
    fn test_orphaned_content_detection_and_removal() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create_snapshot("greeter", "a", 0.5, "u", "d").unwrap();

        let orphan = store.plugin_dir("greeter").join("20200101_000000_000000.aether");
        fs::write(&orphan, "lost").unwrap();

        assert_eq!(store.find_orphaned_content("greeter").unwrap(), vec![orphan.clone()]);
        assert!(orphan.exists());

        let removed = store.remove_orphaned_content("greeter").unwrap();
        assert_eq!(removed, vec![orphan.clone()]);
        assert!(!orphan.exists());
        assert_eq!(store.list_snapshots("greeter").unwrap().len(), 1);
    }

    #[test]
    fn test_audit_event_on_create() {
        let temp = TempDir::new().unwrap();
        let sink = MemoryAuditSink::default();
        let store = store(&temp).with_audit_sink(Arc::new(sink.clone()));

        let snapshot = store.create_snapshot("greeter", "a", 0.5, "u", "init").unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditEventKind::SnapshotCreated);
        assert_eq!(events[0].timestamp_id.as_deref(), Some(snapshot.timestamp_id.as_str()));
    }

    #[test]
    fn test_default_sink_is_tracing() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(format!("{store:?}").contains("audit: TracingAuditSink"));
        store.create_snapshot("greeter", "a", 0.5, "u", "init").unwrap();
    }
}
