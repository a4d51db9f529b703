//! Per-plugin key/value state.
//!
//! Each entry is one JSON row under `<root>/state/<plugin>/`, named by the
//! Blake3 hash of its key. Reads go through an LRU cache that mirrors the
//! persisted rows: refreshed on every write, invalidated on delete.

use crate::error::{Result, StateError};
use crate::rows::{load_rows, row_paths};
use aether_core::{
    LockScope, SerializedValue, StoreHandle, VALUE_FORMAT_VERSION, ValueTag, file_key,
    read_versioned_json, remove_file_if_exists, validate_name, write_json_atomic,
};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

type CacheKey = (String, String);

/// One persisted state value with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Row layout version.
    pub format_version: u32,
    /// Plugin owning the entry.
    pub plugin_name: String,
    /// Entry key.
    pub key: String,
    /// Stored value.
    pub value: SerializedValue,
    /// Variant of [`value`](Self::value), stored for listing without decoding.
    pub type_tag: ValueTag,
    /// First write.
    pub created_at: DateTime<Utc>,
    /// Latest write.
    pub updated_at: DateTime<Utc>,
    /// Session that wrote the current value.
    pub owning_session: Uuid,
    /// Number of reads served from disk rather than the cache.
    pub access_count: u64,
}

/// Cache-then-store key/value state for plugins.
///
/// `access_count` only grows when a read misses the cache and is served from
/// disk, so it measures store traffic rather than logical reads.
///
/// The cache belongs to this instance. Keep one `StateStore` per handle and
/// share it, or a second instance may read stale cached entries.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, SerializedValue, StoreHandle};
/// use aether_state::StateStore;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let state = StateStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
///
/// state.set("greeter", "greeting", SerializedValue::text("hi"))?;
/// assert_eq!(state.get("greeter", "greeting")?, Some(SerializedValue::text("hi")));
///
/// let fallback = state.get_or("greeter", "missing", SerializedValue::text("hello"))?;
/// assert_eq!(fallback.as_text(), Some("hello"));
/// # Ok(())
/// # }
/// ```
pub struct StateStore {
    handle: StoreHandle,
    session_id: Uuid,
    cache: Mutex<LruCache<CacheKey, StateEntry>>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("root", &self.handle.state_dir())
            .field("session_id", &self.session_id)
            .field("cached", &self.cache_len())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a state store with a fresh session id and a cache sized by
    /// `state_cache_capacity`.
    #[must_use]
    pub fn new(handle: StoreHandle) -> Self {
        let capacity =
            NonZeroUsize::new(handle.config().state_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let session_id = Uuid::new_v4();
        tracing::debug!("State session {} started", session_id);

        Self {
            handle,
            session_id,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Id stamped on every entry this store writes.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Stores `value` under `(plugin_name, key)`, replacing any previous value.
    ///
    /// The type tag is taken from the value's variant. `created_at` and
    /// `access_count` carry over from the previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid plugin name or if the row cannot be written.
    pub fn set(&self, plugin_name: &str, key: &str, value: SerializedValue) -> Result<StateEntry> {
        validate_name("plugin name", plugin_name)?;

        self.handle.locks().with_scoped_lock(LockScope::State, plugin_name, || {
            let previous = match self.cached(plugin_name, key) {
                Some(entry) => Some(entry),
                None => self.load(plugin_name, key)?,
            };

            let now = Utc::now();
            let entry = StateEntry {
                format_version: VALUE_FORMAT_VERSION,
                plugin_name: plugin_name.to_string(),
                key: key.to_string(),
                type_tag: value.tag(),
                value,
                created_at: previous.as_ref().map_or(now, |p| p.created_at),
                updated_at: now,
                owning_session: self.session_id,
                access_count: previous.as_ref().map_or(0, |p| p.access_count),
            };

            write_json_atomic(&self.row_path(plugin_name, key), &entry)?;
            self.cache_put(entry.clone());
            tracing::debug!("Stored state {}:{} ({})", plugin_name, key, entry.type_tag);
            Ok(entry)
        })
    }

    /// Returns the value stored under `(plugin_name, key)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row exists but cannot be read.
    pub fn get(&self, plugin_name: &str, key: &str) -> Result<Option<SerializedValue>> {
        Ok(self.entry(plugin_name, key)?.map(|entry| entry.value))
    }

    /// Returns the stored value, or `default` if there is none.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn get_or(&self, plugin_name: &str, key: &str, default: SerializedValue) -> Result<SerializedValue> {
        Ok(self.get(plugin_name, key)?.unwrap_or(default))
    }

    /// Returns the full entry, including its bookkeeping.
    ///
    /// A cache hit is returned as is. A miss reads the row, increments its
    /// `access_count`, writes it back, and caches it.
    ///
    /// # Errors
    ///
    /// Returns an error if the row exists but cannot be read or updated.
    pub fn entry(&self, plugin_name: &str, key: &str) -> Result<Option<StateEntry>> {
        validate_name("plugin name", plugin_name)?;
        if let Some(entry) = self.cached(plugin_name, key) {
            return Ok(Some(entry));
        }

        self.handle.locks().with_scoped_lock(LockScope::State, plugin_name, || {
            if let Some(entry) = self.cached(plugin_name, key) {
                return Ok(Some(entry));
            }
            let Some(mut entry) = self.load(plugin_name, key)? else {
                return Ok(None);
            };

            entry.access_count += 1;
            write_json_atomic(&self.row_path(plugin_name, key), &entry)?;
            self.cache_put(entry.clone());
            Ok(Some(entry))
        })
    }

    /// Removes one entry. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be removed.
    pub fn delete(&self, plugin_name: &str, key: &str) -> Result<bool> {
        validate_name("plugin name", plugin_name)?;

        self.handle.locks().with_scoped_lock(LockScope::State, plugin_name, || {
            self.cache_lock()
                .pop(&(plugin_name.to_string(), key.to_string()));
            let removed = remove_file_if_exists(&self.row_path(plugin_name, key))?;
            if removed {
                tracing::debug!("Deleted state {}:{}", plugin_name, key);
            }
            Ok(removed)
        })
    }

    /// Removes every entry of a plugin. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error; rows removed before it stay removed.
    pub fn delete_all(&self, plugin_name: &str) -> Result<usize> {
        validate_name("plugin name", plugin_name)?;

        self.handle.locks().with_scoped_lock(LockScope::State, plugin_name, || {
            {
                let mut cache = self.cache_lock();
                let stale: Vec<CacheKey> = cache
                    .iter()
                    .filter(|((plugin, _), _)| plugin.as_str() == plugin_name)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in stale {
                    cache.pop(&key);
                }
            }

            let dir = self.plugin_dir(plugin_name);
            let mut removed = 0;
            for path in row_paths(&dir)? {
                if remove_file_if_exists(&path)? {
                    removed += 1;
                }
            }
            if let Err(e) = fs::remove_dir(&dir) {
                tracing::debug!("Kept state directory {}: {}", dir.display(), e);
            }

            tracing::info!("Deleted {} state entries for {}", removed, plugin_name);
            Ok(removed)
        })
    }

    /// Lists the keys stored for a plugin, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin directory cannot be read.
    pub fn keys(&self, plugin_name: &str) -> Result<Vec<String>> {
        validate_name("plugin name", plugin_name)?;
        let mut keys: Vec<String> = load_rows::<StateEntry>(&self.plugin_dir(plugin_name))?
            .into_iter()
            .map(|(_, entry)| entry.key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache_lock().len()
    }

    fn load(&self, plugin_name: &str, key: &str) -> Result<Option<StateEntry>> {
        let path = self.row_path(plugin_name, key);
        let Some(entry) = read_versioned_json::<StateEntry>(&path)? else {
            return Ok(None);
        };
        if entry.plugin_name != plugin_name || entry.key != key {
            return Err(StateError::InvalidRecord {
                path,
                reason: format!("row holds {}:{}", entry.plugin_name, entry.key),
            });
        }
        Ok(Some(entry))
    }

    fn cached(&self, plugin_name: &str, key: &str) -> Option<StateEntry> {
        self.cache_lock()
            .get(&(plugin_name.to_string(), key.to_string()))
            .cloned()
    }

    fn cache_put(&self, entry: StateEntry) {
        self.cache_lock()
            .put((entry.plugin_name.clone(), entry.key.clone()), entry);
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, StateEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plugin_dir(&self, plugin_name: &str) -> PathBuf {
        self.handle.state_dir().join(plugin_name)
    }

    fn row_path(&self, plugin_name: &str, key: &str) -> PathBuf {
        self.plugin_dir(plugin_name)
            .join(format!("{}.json", file_key(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::PersistenceConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> StateStore {
        StateStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path())).unwrap())
    }

    #[test]
    fn test_round_trip_every_tag() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        let values = [
            SerializedValue::structured("prefs/v1", &json!({"theme": "dark", "size": 3})).unwrap(),
            SerializedValue::text("hello"),
            SerializedValue::opaque(vec![0_u8, 159, 146, 150]),
        ];

        for (i, value) in values.iter().enumerate() {
            let entry = state.set("greeter", &format!("k{i}"), value.clone()).unwrap();
            assert_eq!(entry.type_tag, value.tag());
        }

        let reopened = store(&temp);
        for (i, value) in values.iter().enumerate() {
            assert_eq!(reopened.get("greeter", &format!("k{i}")).unwrap().as_ref(), Some(value));
        }
    }

    #[test]
    fn test_delete_then_get_returns_default() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        state.set("greeter", "k", SerializedValue::text("v")).unwrap();

        assert!(state.delete("greeter", "k").unwrap());
        assert!(!state.delete("greeter", "k").unwrap());
        assert_eq!(state.get("greeter", "k").unwrap(), None);
        assert_eq!(
            state.get_or("greeter", "k", SerializedValue::text("d")).unwrap(),
            SerializedValue::text("d")
        );
    }

    #[test]
    fn test_access_count_only_counts_cache_misses() {
        let temp = TempDir::new().unwrap();
        let writer = store(&temp);
        writer.set("greeter", "k", SerializedValue::text("v")).unwrap();

        // Served from the writer's cache.
        writer.get("greeter", "k").unwrap();
        writer.get("greeter", "k").unwrap();
        assert_eq!(writer.entry("greeter", "k").unwrap().unwrap().access_count, 0);

        let reader = store(&temp);
        assert_eq!(reader.entry("greeter", "k").unwrap().unwrap().access_count, 1);
        assert_eq!(reader.entry("greeter", "k").unwrap().unwrap().access_count, 1);

        let another = store(&temp);
        assert_eq!(another.entry("greeter", "k").unwrap().unwrap().access_count, 2);
    }

    #[test]
    fn test_set_keeps_created_at_and_stamps_session() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        let first = state.set("greeter", "k", SerializedValue::text("1")).unwrap();
        let second = state.set("greeter", "k", SerializedValue::text("2")).unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.owning_session, state.session_id());
    }

    #[test]
    fn test_cache_refreshed_on_write() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        state.set("greeter", "k", SerializedValue::text("old")).unwrap();
        state.get("greeter", "k").unwrap();
        state.set("greeter", "k", SerializedValue::text("new")).unwrap();

        assert_eq!(state.get("greeter", "k").unwrap(), Some(SerializedValue::text("new")));
    }

    #[test]
    fn test_cache_is_bounded() {
        let temp = TempDir::new().unwrap();
        let config = PersistenceConfig::builder()
            .root_dir(temp.path())
            .state_cache_capacity(2)
            .build();
        let state = StateStore::new(StoreHandle::open(config).unwrap());

        for i in 0..5 {
            state.set("greeter", &format!("k{i}"), SerializedValue::text("v")).unwrap();
        }
        assert_eq!(state.cache_len(), 2);
        assert_eq!(state.get("greeter", "k0").unwrap(), Some(SerializedValue::text("v")));
    }

    #[test]
    fn test_keys_and_delete_all() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        for key in ["zeta", "alpha", "with/slash"] {
            state.set("greeter", key, SerializedValue::text(key)).unwrap();
        }
        state.set("weather", "alpha", SerializedValue::text("w")).unwrap();

        assert_eq!(state.keys("greeter").unwrap(), vec!["alpha", "with/slash", "zeta"]);
        assert_eq!(state.delete_all("greeter").unwrap(), 3);
        assert!(state.keys("greeter").unwrap().is_empty());
        assert_eq!(state.get("greeter", "alpha").unwrap(), None);
        assert_eq!(state.get("weather", "alpha").unwrap(), Some(SerializedValue::text("w")));
    }

    #[test]
    fn test_unknown_row_version_is_rejected() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        state.set("greeter", "k", SerializedValue::text("v")).unwrap();

        let path = state.row_path("greeter", "k");
        let mut row: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        row["format_version"] = json!(99);
        fs::write(&path, serde_json::to_vec(&row).unwrap()).unwrap();

        let fresh = store(&temp);
        let err = fresh.get("greeter", "k").unwrap_err();
        assert_eq!(err.kind(), aether_core::ErrorKind::Format);
    }
}
