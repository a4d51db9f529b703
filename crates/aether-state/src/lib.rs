//! Runtime state for Aetherra plugins.
//!
//! Where `aether-snapshots` versions a plugin's source, this crate keeps what
//! a plugin learns while it runs:
//!
//! - [`StateStore`] holds typed key/value entries per plugin, behind an LRU cache
//! - [`ContextStore`] accumulates bounded interaction history per named context
//! - [`SharedStateBroker`] shares values between plugins under owner-set permissions
//! - [`CognitiveMemory`] records interactions and derives insights and suggestions
//!
//! All four persist through the same [`aether_core::StoreHandle`] and are safe
//! to share between threads.
//!
//! # Examples
//!
//! ```
//! use aether_core::{PersistenceConfig, SerializedValue, StoreHandle};
//! use aether_state::{SharedStateBroker, StateStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let temp = tempfile::tempdir()?;
//! let handle = StoreHandle::open(PersistenceConfig::with_root(temp.path()))?;
//!
//! let state = StateStore::new(handle.clone());
//! state.set("greeter", "greeting", SerializedValue::text("hello"))?;
//! assert_eq!(state.get("greeter", "greeting")?, Some(SerializedValue::text("hello")));
//!
//! let broker = SharedStateBroker::new(handle);
//! broker.set_shared("weather", "city", SerializedValue::text("Oslo"), "weather", ["greeter"])?;
//! assert!(broker.get_shared("weather", "city", "greeter")?.is_some());
//! assert!(broker.get_shared("weather", "city", "stranger")?.is_none());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

mod cognitive;
mod context;
mod error;
mod rows;
mod shared;
mod state;

pub use cognitive::{CognitiveMemory, Insights, MEMORY_CONTEXT, RECENT_BUFFER_CAPACITY, Suggestion};
pub use context::{ContextRecord, ContextStore, ContextUpdate, Interaction};
pub use error::{Result, StateError};
pub use shared::{AccessAction, AccessLogEntry, SharedStateBroker, SharedStateEntry};
pub use state::{StateEntry, StateStore};
