//! Core types for the Aetherra plugin persistence layer.
//!
//! This crate provides the foundations shared by the snapshot and state
//! crates in this workspace.
//!
//! # Architecture
//!
//! The core consists of:
//! - [`StoreHandle`]: an opened persistence root, injected into every component
//! - [`PersistenceConfig`]: configuration with builder and TOML loading
//! - [`SerializedValue`]: the versioned value union stored by state components
//! - [`KeyedLocks`]: per-key mutual exclusion, shared through the handle
//! - [`AuditSink`]: optional receiver of snapshot and rollback events
//! - [`Error`] and [`ErrorKind`]: the shared error taxonomy

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

mod audit;
mod bounded;
mod config;
mod error;
mod handle;
mod locks;
mod names;
mod value;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use bounded::{
    ACCESS_LOG_CAPACITY, FAILURE_PATTERN_CAPACITY, HISTORY_CAPACITY, SUCCESS_PATTERN_CAPACITY,
    append_bounded,
};
pub use config::{PersistenceConfig, PersistenceConfigBuilder};
pub use error::{Error, ErrorKind, Result};
pub use handle::{
    CATALOG_FILE, CATALOG_FORMAT_VERSION, StoreHandle, dir_size, read_json, remove_file_if_exists,
    write_json_atomic,
};
pub use locks::{KeyedLocks, LockScope};
pub use names::{file_key, validate_name};
pub use value::{
    SerializedValue, StructuredValue, VALUE_FORMAT_VERSION, ValueTag, check_format_version,
    read_versioned_json,
};
