//! Restoring a plugin's live source from a snapshot.
//!
//! A rollback moves through fixed phases:
//!
//! ```text
//! Idle -> Validating -> BackingUp -> Restoring -> Done
//!            \              \            \
//!             +--------------+------------+--> Failed
//! ```
//!
//! The plugin lock is held from validation to the final annotation, so no
//! snapshot of the same plugin can be created or pruned mid-rollback.

use crate::error::{Result, SnapshotError};
use crate::store::SnapshotStore;
use crate::types::{NewSnapshot, ROLLBACK_BACKUP_CREATOR, ROLLED_BACK_AT, Snapshot};
use aether_core::{AuditEvent, AuditEventKind, validate_name};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Access to a plugin's live source file.
///
/// The default [`FsPluginSource`] reads and writes the local filesystem.
/// Hosts that keep plugins elsewhere (an editor buffer, a remote store)
/// provide their own.
pub trait PluginSource: Send + Sync + fmt::Debug {
    /// Reads the current content, or `None` if there is no live file.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than "not found".
    fn read_current(&self, target: &Path) -> io::Result<Option<String>>;

    /// Replaces the live content.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that stopped the write.
    fn write_restored(&self, target: &Path, content: &str) -> io::Result<()>;
}

/// Filesystem-backed [`PluginSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPluginSource;

impl PluginSource for FsPluginSource {
    fn read_current(&self, target: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(target) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_restored(&self, target: &Path, content: &str) -> io::Result<()> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)
    }
}

/// Phase of a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPhase {
    /// Not started.
    Idle,
    /// Loading the snapshot and checking its syntax flag.
    Validating,
    /// Snapshotting the live file.
    BackingUp,
    /// Writing the snapshot content into the live file.
    Restoring,
    /// Restored and annotated.
    Done,
    /// Stopped by an error.
    Failed,
}

/// Report of a completed rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOutcome {
    /// Plugin that was rolled back.
    pub plugin_name: String,
    /// Snapshot that was restored, including its new annotation.
    pub restored: Snapshot,
    /// Snapshot of the live file taken before it was overwritten.
    pub backup: Option<Snapshot>,
    /// Live file that was written.
    pub target: PathBuf,
    /// Phases traversed, starting at [`RollbackPhase::Idle`].
    pub phases: Vec<RollbackPhase>,
    /// False if the live file was restored but the annotation could not be saved.
    pub annotated: bool,
}

/// Restores snapshots into live plugin files.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
/// use aether_snapshots::{RollbackController, SnapshotStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let store = SnapshotStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path().join("db")))?);
/// let live = temp.path().join("greeter.aether");
///
/// let good = store.create_snapshot("greeter", "say('hi')", 0.9, "user", "known good")?;
/// std::fs::write(&live, "say('bye')")?;
///
/// let outcome = RollbackController::new(store.clone()).rollback("greeter", &good.timestamp_id, &live, false)?;
/// assert_eq!(std::fs::read_to_string(&live)?, "say('hi')");
/// assert!(outcome.backup.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RollbackController {
    store: SnapshotStore,
    source: Arc<dyn PluginSource>,
}

impl RollbackController {
    /// Creates a controller writing through [`FsPluginSource`].
    #[must_use]
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            source: Arc::new(FsPluginSource),
        }
    }

    /// Replaces the live-file accessor.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn PluginSource>) -> Self {
        self.source = source;
        self
    }

    /// Restores snapshot `timestamp_id` into `target`.
    ///
    /// If `target` exists, its content is snapshotted first with
    /// `created_by = "rollback-backup"`. On success the restored snapshot's
    /// row gains a `rolled_back_at` annotation. Success and failure are both
    /// reported to the store's audit sink.
    ///
    /// # Errors
    ///
    /// * [`SnapshotError::SnapshotNotFound`] - Unknown snapshot
    /// * [`SnapshotError::InvalidSyntax`] - Snapshot failed its syntax check and `force` is false
    /// * [`SnapshotError::ChecksumMismatch`] - Snapshot content was altered on disk
    /// * [`SnapshotError::RestoreFailed`] - Writing the live file failed; carries the backup id
    pub fn rollback(
        &self,
        plugin_name: &str,
        timestamp_id: &str,
        target: &Path,
        force: bool,
    ) -> Result<RollbackOutcome> {
        validate_name("plugin name", plugin_name)?;
        validate_name("timestamp id", timestamp_id)?;

        let mut phases = vec![RollbackPhase::Idle];
        let result = self.store.with_plugin_lock(plugin_name, || {
            self.rollback_locked(plugin_name, timestamp_id, target, force, &mut phases)
        });

        match result {
            Ok(outcome) => {
                tracing::info!(
                    "Rolled back {} to {} (backup: {:?})",
                    plugin_name,
                    timestamp_id,
                    outcome.backup.as_ref().map(|b| &b.timestamp_id)
                );
                self.store.emit(AuditEvent::new(
                    AuditEventKind::RollbackCompleted,
                    plugin_name,
                    Some(timestamp_id.to_string()),
                    format!("restored into {}", target.display()),
                ));
                Ok(outcome)
            }
            Err(e) => {
                let reached = phases.last().copied().unwrap_or(RollbackPhase::Idle);
                phases.push(RollbackPhase::Failed);
                tracing::warn!(
                    "Rollback of {} to {} failed during {:?} (phases {:?}): {}",
                    plugin_name,
                    timestamp_id,
                    reached,
                    phases,
                    e
                );
                self.store.emit(AuditEvent::new(
                    AuditEventKind::RollbackFailed,
                    plugin_name,
                    Some(timestamp_id.to_string()),
                    format!("failed during {reached:?}: {e}"),
                ));
                Err(e)
            }
        }
    }

    fn rollback_locked(
        &self,
        plugin_name: &str,
        timestamp_id: &str,
        target: &Path,
        force: bool,
        phases: &mut Vec<RollbackPhase>,
    ) -> Result<RollbackOutcome> {
        phases.push(RollbackPhase::Validating);
        let snapshot = self.store.get_snapshot(plugin_name, timestamp_id)?;
        if !snapshot.syntax_valid {
            if !force {
                return Err(SnapshotError::InvalidSyntax {
                    plugin_name: plugin_name.to_string(),
                    timestamp_id: timestamp_id.to_string(),
                });
            }
            tracing::warn!(
                "Forcing rollback of {} to {} despite invalid syntax",
                plugin_name,
                timestamp_id
            );
        }
        let content = self.store.read_snapshot_content(&snapshot)?;

        phases.push(RollbackPhase::BackingUp);
        let live = self
            .source
            .read_current(target)
            .map_err(|e| SnapshotError::io(format!("reading {}", target.display()), e))?;
        let backup = match live {
            Some(live) => {
                let request = NewSnapshot::new(
                    1.0,
                    ROLLBACK_BACKUP_CREATOR,
                    format!("Backup before rollback to {timestamp_id}"),
                )
                .with_metadata("rollback_target", timestamp_id)
                .with_metadata("live_path", target.display().to_string());
                let backup = self.store.create_locked(plugin_name, &live, request)?;
                self.store.emit_created(&backup);
                Some(backup)
            }
            None => {
                tracing::debug!("No live file at {}; nothing to back up", target.display());
                None
            }
        };

        phases.push(RollbackPhase::Restoring);
        self.source
            .write_restored(target, &content)
            .map_err(|source| SnapshotError::RestoreFailed {
                plugin_name: plugin_name.to_string(),
                target: target.to_path_buf(),
                backup_timestamp_id: backup.as_ref().map(|b| b.timestamp_id.clone()),
                source,
            })?;

        let annotation = serde_json::json!({
            "target": target.display().to_string(),
            "backup_timestamp_id": backup.as_ref().map(|b| b.timestamp_id.clone()),
        });
        let (restored, annotated) =
            match self
                .store
                .annotate_locked(plugin_name, timestamp_id, ROLLED_BACK_AT, annotation)
            {
                Ok(updated) => (updated, true),
                Err(e) => {
                    tracing::warn!(
                        "Restored {} but could not annotate {}: {}",
                        plugin_name,
                        timestamp_id,
                        e
                    );
                    (snapshot, false)
                }
            };

        phases.push(RollbackPhase::Done);
        Ok(RollbackOutcome {
            plugin_name: plugin_name.to_string(),
            restored,
            backup,
            target: target.to_path_buf(),
            phases: std::mem::take(phases),
            annotated,
        })
    }
}
