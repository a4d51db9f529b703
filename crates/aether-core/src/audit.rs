//! Audit events emitted for higher-level memory systems.
//!
//! Snapshot and rollback components report notable events to an
//! [`AuditSink`]. Hosts supply their own sink; the default
//! [`TracingAuditSink`] just logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A snapshot was recorded.
    SnapshotCreated,
    /// A snapshot was restored into the live plugin file.
    RollbackCompleted,
    /// A rollback stopped before completing.
    RollbackFailed,
    /// Retention removed old snapshots.
    SnapshotsPruned,
}

/// One audited event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub kind: AuditEventKind,
    /// Plugin the event concerns.
    pub plugin_name: String,
    /// Snapshot involved, if any.
    pub timestamp_id: Option<String>,
    /// Human-readable detail.
    pub detail: String,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        kind: AuditEventKind,
        plugin_name: impl Into<String>,
        timestamp_id: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            plugin_name: plugin_name.into(),
            timestamp_id,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

/// Receiver of audit events.
///
/// Implementations must be cheap and must not fail the operation that
/// triggered the event.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Records one event.
    fn record(&self, event: &AuditEvent);
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match event.kind {
            AuditEventKind::RollbackFailed => tracing::warn!(
                "audit {:?}: plugin={} snapshot={:?} {}",
                event.kind,
                event.plugin_name,
                event.timestamp_id,
                event.detail
            ),
            _ => tracing::info!(
                "audit {:?}: plugin={} snapshot={:?} {}",
                event.kind,
                event.plugin_name,
                event.timestamp_id,
                event.detail
            ),
        }
    }
}

/// Sink that keeps events in memory, for hosts that poll and for tests.
///
/// # Examples
///
/// ```
/// use aether_core::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink};
///
/// let sink = MemoryAuditSink::default();
/// sink.record(&AuditEvent::new(AuditEventKind::SnapshotCreated, "greeter", None, "init"));
/// assert_eq!(sink.events().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Returns a copy of every recorded event, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
