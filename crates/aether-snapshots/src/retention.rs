//! Retention of snapshot history.

use crate::error::Result;
use crate::store::SnapshotStore;
use aether_core::{AuditEvent, AuditEventKind};
use serde::Serialize;

/// A snapshot retention could not remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionFailure {
    /// Snapshot that was kept.
    pub timestamp_id: String,
    /// Why removal failed.
    pub reason: String,
}

/// Outcome of one retention pass over a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RetentionReport {
    /// Plugin that was pruned.
    pub plugin_name: String,
    /// Snapshots present before the pass.
    pub total_before: usize,
    /// Removed snapshot ids, newest first.
    pub removed: Vec<String>,
    /// Candidates that could not be removed; their rows are retained.
    pub failures: Vec<RetentionFailure>,
}

impl RetentionReport {
    /// Number of snapshots removed.
    #[must_use]
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    /// True if every candidate was removed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Prunes old snapshots, keeping the most recent ones.
///
/// Candidates are chosen once, from a newest-first listing: everything past
/// the first `keep_count`. Each candidate is then removed under the plugin
/// lock, content file first. Snapshots created during the pass are never
/// candidates.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
/// use aether_snapshots::{RetentionManager, SnapshotStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let store = SnapshotStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
/// for n in 0..5 {
///     store.create_snapshot("greeter", &format!("v = {n}"), 0.5, "user", "edit")?;
/// }
///
/// let report = RetentionManager::new(store.clone()).cleanup_old_snapshots("greeter", 2)?;
/// assert_eq!(report.removed_count(), 3);
/// assert_eq!(store.list_snapshots("greeter")?.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetentionManager {
    store: SnapshotStore,
}

impl RetentionManager {
    /// Creates a retention manager over a snapshot store.
    #[must_use]
    pub const fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Removes all but the `keep_count` most recent snapshots of a plugin.
    ///
    /// Per-item failures are collected in the report and do not stop the
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if the snapshot list cannot be read.
    pub fn cleanup_old_snapshots(&self, plugin_name: &str, keep_count: usize) -> Result<RetentionReport> {
        let snapshots = self.store.list_snapshots(plugin_name)?;
        let mut report = RetentionReport {
            plugin_name: plugin_name.to_string(),
            total_before: snapshots.len(),
            ..RetentionReport::default()
        };

        for candidate in snapshots.iter().skip(keep_count) {
            let id = &candidate.timestamp_id;
            let outcome = self
                .store
                .with_plugin_lock(plugin_name, || self.store.remove_locked(plugin_name, id));

            match outcome {
                Ok(true) => report.removed.push(id.clone()),
                Ok(false) => tracing::debug!("Snapshot {}@{} already removed", plugin_name, id),
                Err(e) => {
                    tracing::warn!("Failed to remove snapshot {}@{}: {}", plugin_name, id, e);
                    report.failures.push(RetentionFailure {
                        timestamp_id: id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.removed.is_empty() {
            tracing::info!(
                "Pruned {} of {} snapshots for {} (keep {})",
                report.removed_count(),
                report.total_before,
                plugin_name,
                keep_count
            );
            self.store.emit(AuditEvent::new(
                AuditEventKind::SnapshotsPruned,
                plugin_name,
                None,
                format!("removed {}, failed {}", report.removed_count(), report.failures.len()),
            ));
        }

        Ok(report)
    }

    /// Prunes using the configured `default_keep_count`.
    ///
    /// # Errors
    ///
    /// Same as [`cleanup_old_snapshots`](Self::cleanup_old_snapshots).
    pub fn cleanup_with_default(&self, plugin_name: &str) -> Result<RetentionReport> {
        let keep_count = self.store.handle().config().default_keep_count;
        self.cleanup_old_snapshots(plugin_name, keep_count)
    }

    /// Prunes every plugin that has snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin list or a snapshot list cannot be read.
    pub fn cleanup_all(&self, keep_count: usize) -> Result<Vec<RetentionReport>> {
        self.store
            .list_plugins()?
            .iter()
            .map(|plugin| self.cleanup_old_snapshots(plugin, keep_count))
            .collect()
    }
}
