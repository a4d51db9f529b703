//! Versioned history of plugin source.
//!
//! Every edit to a plugin can be recorded as an immutable snapshot. The
//! history can then be compared, pruned, and restored:
//!
//! - [`SnapshotStore`] records snapshots and reads them back, verifying checksums
//! - [`DiffEngine`] renders unified, context, or HTML diffs between two snapshots
//! - [`RetentionManager`] keeps the most recent snapshots and removes the rest
//! - [`RollbackController`] restores a snapshot into the live plugin file,
//!   backing up the live content first
//!
//! # Layout
//!
//! ```text
//! <root>/snapshots/
//! └── greeter/
//!     ├── 20261017_093015_123456.aether   # content, never rewritten
//!     └── 20261017_093015_123456.json     # catalog row
//! ```
//!
//! # Examples
//!
//! ```
//! use aether_core::{PersistenceConfig, StoreHandle};
//! use aether_snapshots::{DiffEngine, DiffFormat, RollbackController, SnapshotStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let temp = tempfile::tempdir()?;
//! let handle = StoreHandle::open(PersistenceConfig::with_root(temp.path().join("db")))?;
//! let store = SnapshotStore::new(handle);
//!
//! let v1 = store.create_snapshot("greeter", "say('hi')\n", 0.9, "user", "first")?;
//! let v2 = store.create_snapshot("greeter", "say('hey')\n", 0.6, "ai", "tweak")?;
//!
//! let diff = DiffEngine::new(store.clone()).diff("greeter", &v1.timestamp_id, &v2.timestamp_id, DiffFormat::Unified)?;
//! assert!(diff.contains("+say('hey')"));
//!
//! let live = temp.path().join("greeter.aether");
//! RollbackController::new(store).rollback("greeter", &v1.timestamp_id, &live, false)?;
//! assert_eq!(std::fs::read_to_string(live)?, "say('hi')\n");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod checksum;
pub mod diff;
mod error;
mod retention;
mod rollback;
mod store;
mod syntax;
mod types;

pub use diff::{DiffEngine, DiffFormat, DiffStats};
pub use error::{Result, SnapshotError};
pub use retention::{RetentionFailure, RetentionManager, RetentionReport};
pub use rollback::{FsPluginSource, PluginSource, RollbackController, RollbackOutcome, RollbackPhase};
pub use store::SnapshotStore;
pub use syntax::{DelimiterCheck, SyntaxCheck};
pub use types::{
    Annotation, FORMAT_VERSION, HistoryStats, NewSnapshot, ROLLBACK_BACKUP_CREATOR,
    ROLLED_BACK_AT, SizeTrend, Snapshot,
};
