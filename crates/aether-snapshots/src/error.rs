//! Error types for snapshot operations.

use aether_core::ErrorKind;
use std::path::PathBuf;

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while recording, diffing, pruning, or restoring snapshots.
#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    /// The referenced snapshot has no catalog row.
    ///
    /// # Examples
    ///
    /// ```
    /// use aether_core::{PersistenceConfig, StoreHandle};
    /// use aether_snapshots::{SnapshotError, SnapshotStore};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let temp = tempfile::tempdir()?;
    /// let store = SnapshotStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
    ///
    /// let result = store.get_snapshot("greeter", "20260101_000000_000000");
    /// assert!(matches!(result, Err(SnapshotError::SnapshotNotFound { .. })));
    /// # Ok(())
    /// # }
    /// ```
    #[error("Snapshot not found: {plugin_name}@{timestamp_id}")]
    SnapshotNotFound {
        /// Plugin the snapshot was looked up for
        plugin_name: String,
        /// Requested snapshot id
        timestamp_id: String,
    },

    /// Confidence scores must be finite and within `0.0..=1.0`.
    #[error("Invalid confidence score: {value}")]
    InvalidConfidence {
        /// The rejected score
        value: f64,
    },

    /// Rollback target failed the syntax check and the caller did not force it.
    ///
    /// Pass `force = true` to restore it anyway.
    #[error("Snapshot {plugin_name}@{timestamp_id} has invalid syntax; rollback requires force")]
    InvalidSyntax {
        /// Plugin being rolled back
        plugin_name: String,
        /// Snapshot that failed validation
        timestamp_id: String,
    },

    /// Stored content does not match the checksum recorded in its catalog row.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Content file with mismatched checksum
        path: String,
        /// Checksum from the catalog row
        expected: String,
        /// Checksum of the bytes on disk
        actual: String,
    },

    /// A catalog row or content file is malformed.
    #[error("Invalid snapshot record {path}: {reason}")]
    InvalidRecord {
        /// File that could not be interpreted
        path: PathBuf,
        /// Why it is invalid
        reason: String,
    },

    /// Writing the live plugin file failed during rollback.
    ///
    /// The live file may be partially written. When the live file existed,
    /// `backup_timestamp_id` names the snapshot holding its previous content.
    #[error("Failed to restore {plugin_name} into {target:?}: {source}")]
    RestoreFailed {
        /// Plugin being rolled back
        plugin_name: String,
        /// Live file that was being written
        target: PathBuf,
        /// Backup snapshot taken before the write, if any
        backup_timestamp_id: Option<String>,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Error from the shared persistence infrastructure.
    #[error(transparent)]
    Core(#[from] aether_core::Error),
}

impl SnapshotError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SnapshotNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidConfidence { .. } => ErrorKind::InvalidInput,
            Self::InvalidSyntax { .. } => ErrorKind::Validation,
            Self::ChecksumMismatch { .. } | Self::InvalidRecord { .. } => ErrorKind::Format,
            Self::RestoreFailed { .. } => ErrorKind::Io,
            Self::Core(inner) => inner.kind(),
        }
    }

    /// Returns true if the caller can fix the problem by changing its request.
    ///
    /// Recoverable errors are caller mistakes (unknown snapshot, bad score,
    /// unforced invalid rollback) rather than storage failures.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::SnapshotNotFound { .. }
            | Self::InvalidConfidence { .. }
            | Self::InvalidSyntax { .. } => true,
            Self::Core(inner) => inner.is_recoverable(),
            _ => false,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Core(aether_core::Error::io(context, source))
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(source: serde_json::Error) -> Self {
        Self::Core(source.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_snapshot_not_found_display() {
        let error = SnapshotError::SnapshotNotFound {
            plugin_name: "greeter".to_string(),
            timestamp_id: "20260101_000000_000000".to_string(),
        };

        let display = error.to_string();
        assert!(display.contains("Snapshot not found"));
        assert!(display.contains("greeter@20260101_000000_000000"));
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_invalid_syntax_is_validation() {
        let error = SnapshotError::InvalidSyntax {
            plugin_name: "greeter".to_string(),
            timestamp_id: "x".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(error.to_string().contains("requires force"));
    }

    #[test]
    fn test_restore_failed_keeps_backup_and_source() {
        let error = SnapshotError::RestoreFailed {
            plugin_name: "greeter".to_string(),
            target: PathBuf::from("/plugins/greeter.aether"),
            backup_timestamp_id: Some("backup-id".to_string()),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
        };

        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("greeter.aether"));

        use std::error::Error as _;
        assert!(error.source().is_some());
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let error = SnapshotError::ChecksumMismatch {
            path: "greeter/a.aether".to_string(),
            expected: "blake3:abc".to_string(),
            actual: "blake3:def".to_string(),
        };
        let display = error.to_string();
        assert!(display.contains("blake3:abc"));
        assert!(display.contains("blake3:def"));
        assert_eq!(error.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_core_error_kind_passes_through() {
        let error: SnapshotError = aether_core::Error::io("writing", io::Error::other("x")).into();
        assert_eq!(error.kind(), ErrorKind::Io);

        let error = SnapshotError::from(aether_core::Error::InvalidName {
            field: "plugin name".to_string(),
            name: "..".to_string(),
            reason: "dots".to_string(),
        });
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: SnapshotError = json_error.into();
        assert_eq!(error.kind(), ErrorKind::Format);
    }
}
