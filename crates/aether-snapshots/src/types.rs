//! Catalog rows and reports for snapshot history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current catalog row format version.
pub const FORMAT_VERSION: &str = "1.0";

/// Extension of catalog row files.
pub const ROW_EXTENSION: &str = "json";

/// `created_by` value of snapshots taken automatically before a rollback.
pub const ROLLBACK_BACKUP_CREATOR: &str = "rollback-backup";

/// Annotation key appended to a snapshot each time it is restored.
pub const ROLLED_BACK_AT: &str = "rolled_back_at";

/// Catalog row describing one immutable snapshot.
///
/// Serialized to `<timestamp_id>.json` next to the content file. The content
/// is never rewritten; only [`annotations`](Self::annotations) may grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Row format version, currently [`FORMAT_VERSION`].
    pub format_version: String,

    /// Plugin this snapshot belongs to.
    pub plugin_name: String,

    /// Identifier unique within the plugin, e.g. `20261017_093015_123456`
    /// or `20261017_093015_123456_1` after a collision.
    pub timestamp_id: String,

    /// Content file name, relative to the plugin's snapshot directory.
    pub content_file: String,

    /// Caller-supplied confidence in this version, `0.0..=1.0`.
    pub confidence: f64,

    /// Content size in bytes.
    pub size: u64,

    /// Outcome of the best-effort syntax check.
    pub syntax_valid: bool,

    /// Reason the syntax check failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_error: Option<String>,

    /// Who created the snapshot (user, tool, `rollback-backup`, ...).
    pub created_by: String,

    /// Free-text description.
    pub description: String,

    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Collision disambiguator; 0 for the first snapshot in a given microsecond.
    pub sequence: u32,

    /// Blake3 checksum of the content, `"blake3:<hex>"`.
    pub checksum: String,

    /// Append-only notes added after creation.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Snapshot {
    /// Returns the most recent annotation with the given key.
    #[must_use]
    pub fn latest_annotation(&self, key: &str) -> Option<&Annotation> {
        self.annotations.iter().rev().find(|a| a.key == key)
    }
}

/// A note appended to a catalog row after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation key, e.g. [`ROLLED_BACK_AT`].
    pub key: String,
    /// Annotation payload.
    pub value: serde_json::Value,
    /// When it was appended.
    pub at: DateTime<Utc>,
}

/// Parameters for a new snapshot.
///
/// # Examples
///
/// ```
/// use aether_snapshots::NewSnapshot;
///
/// let request = NewSnapshot::new(0.8, "refactor-tool", "before rename")
///     .with_metadata("ticket", "PLG-12");
/// assert_eq!(request.metadata["ticket"], "PLG-12");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    /// Confidence score, `0.0..=1.0`.
    pub confidence: f64,
    /// Creator.
    pub created_by: String,
    /// Description.
    pub description: String,
    /// Extra metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NewSnapshot {
    /// Creates a request without extra metadata.
    #[must_use]
    pub fn new(confidence: f64, created_by: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            confidence,
            created_by: created_by.into(),
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Direction of content size across a plugin's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeTrend {
    /// Newest snapshot is larger than the oldest.
    Increasing,
    /// Newest snapshot is smaller than the oldest.
    Decreasing,
    /// Newest and oldest have the same size.
    Stable,
    /// Fewer than two snapshots.
    Insufficient,
}

/// Summary statistics over a plugin's snapshot history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    /// Number of snapshots.
    pub total: usize,
    /// Mean confidence, 0.0 when there are no snapshots.
    pub confidence_avg: f64,
    /// Lowest confidence, 0.0 when there are no snapshots.
    pub confidence_min: f64,
    /// Highest confidence, 0.0 when there are no snapshots.
    pub confidence_max: f64,
    /// Snapshots created within the configured recent window.
    pub recent_count: usize,
    /// Size direction from oldest to newest.
    pub size_trend: SizeTrend,
    /// Newest snapshot id.
    pub latest: Option<String>,
    /// Oldest snapshot id.
    pub oldest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            format_version: FORMAT_VERSION.to_string(),
            plugin_name: "greeter".to_string(),
            timestamp_id: "20261017_093015_123456".to_string(),
            content_file: "20261017_093015_123456.aether".to_string(),
            confidence: 0.9,
            size: 22,
            syntax_valid: true,
            syntax_error: None,
            created_by: "user".to_string(),
            description: "init".to_string(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            sequence: 0,
            checksum: "blake3:00".to_string(),
            annotations: Vec::new(),
        }
    }

    #[test]
    fn test_snapshot_row_serialization() {
        let row = snapshot();
        let json = serde_json::to_string_pretty(&row).unwrap();
        assert!(json.contains("format_version"));
        assert!(!json.contains("syntax_error"));

        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_row_without_annotations_parses() {
        let mut json = serde_json::to_value(snapshot()).unwrap();
        json.as_object_mut().unwrap().remove("annotations");
        let row: Snapshot = serde_json::from_value(json).unwrap();
        assert!(row.annotations.is_empty());
    }

    #[test]
    fn test_latest_annotation() {
        let mut row = snapshot();
        for n in 0..3 {
            row.annotations.push(Annotation {
                key: ROLLED_BACK_AT.to_string(),
                value: serde_json::json!(n),
                at: Utc::now(),
            });
        }
        assert_eq!(row.latest_annotation(ROLLED_BACK_AT).unwrap().value, 2);
        assert!(row.latest_annotation("missing").is_none());
    }
}
