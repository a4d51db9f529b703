//! Cross-plugin shared state with owner-controlled access.
//!
//! An entry lives under `<root>/shared/<namespace>/`. Reading it is allowed
//! when the requester is the owner, when the allow-list is empty (the entry
//! is public), or when the requester is on the allow-list. Everyone else gets
//! nothing back, silently; the refusal is only visible in the entry's
//! access log.

use crate::error::{Result, StateError};
use crate::rows::{load_rows, populated_subdirs};
use aether_core::{
    ACCESS_LOG_CAPACITY, LockScope, SerializedValue, StoreHandle, VALUE_FORMAT_VERSION,
    append_bounded, file_key, read_versioned_json, remove_file_if_exists, validate_name,
    write_json_atomic,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// What a plugin did with a shared entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    /// The entry was created or replaced.
    Created,
    /// The entry was read.
    Accessed,
    /// A read was refused.
    Denied,
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Accessed => write!(f, "accessed"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// One access-log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Plugin that acted.
    pub plugin: String,
    /// What it did.
    pub action: AccessAction,
    /// When.
    pub at: DateTime<Utc>,
}

/// A value shared between plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedStateEntry {
    /// Row layout version.
    pub format_version: u32,
    /// Namespace grouping related entries.
    pub namespace: String,
    /// Entry key.
    pub key: String,
    /// Shared value.
    pub value: SerializedValue,
    /// Plugin that created the entry.
    pub owner_plugin: String,
    /// Plugins allowed to read besides the owner; empty means everyone.
    pub allowed_plugins: BTreeSet<String>,
    /// Most recent accesses, oldest first.
    #[serde(default)]
    pub access_log: Vec<AccessLogEntry>,
    /// First creation.
    pub created_at: DateTime<Utc>,
    /// Latest replacement.
    pub updated_at: DateTime<Utc>,
}

impl SharedStateEntry {
    /// Returns true if `requester` may read this entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use aether_core::SerializedValue;
    /// use aether_state::SharedStateEntry;
    /// use std::collections::BTreeSet;
    ///
    /// let now = chrono::Utc::now();
    /// let entry = SharedStateEntry {
    ///     format_version: 1,
    ///     namespace: "settings".to_string(),
    ///     key: "theme".to_string(),
    ///     value: SerializedValue::text("dark"),
    ///     owner_plugin: "greeter".to_string(),
    ///     allowed_plugins: BTreeSet::from(["weather".to_string()]),
    ///     access_log: Vec::new(),
    ///     created_at: now,
    ///     updated_at: now,
    /// };
    /// assert!(entry.is_readable_by("greeter"));
    /// assert!(entry.is_readable_by("weather"));
    /// assert!(!entry.is_readable_by("calendar"));
    /// ```
    #[must_use]
    pub fn is_readable_by(&self, requester: &str) -> bool {
        requester == self.owner_plugin
            || self.allowed_plugins.is_empty()
            || self.allowed_plugins.contains(requester)
    }

    fn log(&mut self, plugin: &str, action: AccessAction) {
        append_bounded(
            &mut self.access_log,
            [AccessLogEntry {
                plugin: plugin.to_string(),
                action,
                at: Utc::now(),
            }],
            ACCESS_LOG_CAPACITY,
        );
    }
}

/// Broker for state shared across plugins.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, SerializedValue, StoreHandle};
/// use aether_state::SharedStateBroker;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let broker = SharedStateBroker::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
///
/// broker.set_shared("settings", "theme", SerializedValue::text("dark"), "greeter", ["weather"])?;
///
/// assert_eq!(broker.get_shared("settings", "theme", "weather")?, Some(SerializedValue::text("dark")));
/// assert_eq!(broker.get_shared("settings", "theme", "calendar")?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SharedStateBroker {
    handle: StoreHandle,
}

impl SharedStateBroker {
    /// Creates a broker.
    #[must_use]
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Creates or replaces a shared entry and logs a `created` access.
    ///
    /// The writer becomes the owner and its allow-list replaces the previous
    /// one. Replacing keeps the original creation time and access log, so a
    /// change of owner stays visible there.
    ///
    /// # Errors
    ///
    /// * Invalid namespace or owner name
    /// * I/O errors reading or writing the row
    pub fn set_shared<I, S>(
        &self,
        namespace: &str,
        key: &str,
        value: SerializedValue,
        owner_plugin: &str,
        allowed_plugins: I,
    ) -> Result<SharedStateEntry>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_name("namespace", namespace)?;
        validate_name("plugin name", owner_plugin)?;
        let allowed_plugins: BTreeSet<String> = allowed_plugins.into_iter().map(Into::into).collect();

        self.with_entry_lock(namespace, key, || {
            let now = Utc::now();
            let mut entry = match self.load(namespace, key)? {
                Some(existing) => {
                    if existing.owner_plugin != owner_plugin {
                        tracing::info!(
                            "Shared {}/{} changes owner from {} to {}",
                            namespace,
                            key,
                            existing.owner_plugin,
                            owner_plugin
                        );
                    }
                    SharedStateEntry {
                        value,
                        owner_plugin: owner_plugin.to_string(),
                        allowed_plugins,
                        updated_at: now,
                        ..existing
                    }
                }
                None => SharedStateEntry {
                    format_version: VALUE_FORMAT_VERSION,
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    value,
                    owner_plugin: owner_plugin.to_string(),
                    allowed_plugins,
                    access_log: Vec::new(),
                    created_at: now,
                    updated_at: now,
                },
            };
            entry.log(owner_plugin, AccessAction::Created);

            write_json_atomic(&self.row_path(namespace, key), &entry)?;
            tracing::debug!("Shared {}/{} by {}", namespace, key, owner_plugin);
            Ok(entry)
        })
    }

    /// Reads a shared entry on behalf of `requester`.
    ///
    /// Returns `None` both when the entry does not exist and when the
    /// requester is not allowed to read it; the latter is logged as
    /// `denied` in the entry's access log.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or the access log cannot be saved.
    pub fn get_shared(
        &self,
        namespace: &str,
        key: &str,
        requester: &str,
    ) -> Result<Option<SerializedValue>> {
        validate_name("namespace", namespace)?;

        self.with_entry_lock(namespace, key, || {
            let Some(mut entry) = self.load(namespace, key)? else {
                return Ok(None);
            };

            let allowed = entry.is_readable_by(requester);
            if allowed {
                entry.log(requester, AccessAction::Accessed);
            } else {
                entry.log(requester, AccessAction::Denied);
                tracing::info!("Denied {} read access to {}/{}", requester, namespace, key);
            }
            write_json_atomic(&self.row_path(namespace, key), &entry)?;

            Ok(allowed.then_some(entry.value))
        })
    }

    /// Reads a shared entry, falling back to `default`.
    ///
    /// # Errors
    ///
    /// Same as [`get_shared`](Self::get_shared).
    pub fn get_shared_or(
        &self,
        namespace: &str,
        key: &str,
        requester: &str,
        default: SerializedValue,
    ) -> Result<SerializedValue> {
        Ok(self.get_shared(namespace, key, requester)?.unwrap_or(default))
    }

    /// Removes a shared entry. Only the owner may remove it.
    ///
    /// Returns `false` if there was no entry.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::PermissionDenied`] for a non-owner, or I/O errors.
    pub fn remove_shared(&self, namespace: &str, key: &str, requester: &str) -> Result<bool> {
        validate_name("namespace", namespace)?;

        self.with_entry_lock(namespace, key, || {
            let Some(entry) = self.load(namespace, key)? else {
                return Ok(false);
            };
            if entry.owner_plugin != requester {
                return Err(StateError::PermissionDenied {
                    requester: requester.to_string(),
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    owner: entry.owner_plugin,
                });
            }

            let removed = remove_file_if_exists(&self.row_path(namespace, key))?;
            tracing::debug!("Removed shared {}/{}", namespace, key);
            Ok(removed)
        })
    }

    /// Returns the access log of an entry, oldest first; empty if there is no entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    pub fn access_log(&self, namespace: &str, key: &str) -> Result<Vec<AccessLogEntry>> {
        validate_name("namespace", namespace)?;
        Ok(self
            .load(namespace, key)?
            .map(|entry| entry.access_log)
            .unwrap_or_default())
    }

    /// Lists namespaces holding at least one entry, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared directory cannot be read.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        populated_subdirs(&self.handle.shared_dir())
    }

    /// Lists the keys of a namespace, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace directory cannot be read.
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        validate_name("namespace", namespace)?;
        let mut keys: Vec<String> = load_rows::<SharedStateEntry>(&self.namespace_dir(namespace))?
            .into_iter()
            .map(|(_, entry)| entry.key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn load(&self, namespace: &str, key: &str) -> Result<Option<SharedStateEntry>> {
        let path = self.row_path(namespace, key);
        let Some(entry) = read_versioned_json::<SharedStateEntry>(&path)? else {
            return Ok(None);
        };
        if entry.namespace != namespace || entry.key != key {
            return Err(StateError::InvalidRecord {
                path,
                reason: format!("row holds {}/{}", entry.namespace, entry.key),
            });
        }
        Ok(Some(entry))
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.handle.shared_dir().join(namespace)
    }

    fn row_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", file_key(key)))
    }

    fn with_entry_lock<T>(&self, namespace: &str, key: &str, f: impl FnOnce() -> T) -> T {
        self.handle
            .locks()
            .with_scoped_lock(LockScope::Shared, &format!("{namespace}\0{key}"), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::PersistenceConfig;
    use tempfile::TempDir;

    fn broker(temp: &TempDir) -> SharedStateBroker {
        SharedStateBroker::new(StoreHandle::open(PersistenceConfig::with_root(temp.path())).unwrap())
    }

    fn actions(broker: &SharedStateBroker) -> Vec<(String, AccessAction)> {
        broker
            .access_log("settings", "theme")
            .unwrap()
            .into_iter()
            .map(|e| (e.plugin, e.action))
            .collect()
    }

    #[test]
    fn test_permission_gate() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        let value = SerializedValue::text("dark");
        broker
            .set_shared("settings", "theme", value.clone(), "a", ["b"])
            .unwrap();

        assert_eq!(broker.get_shared("settings", "theme", "a").unwrap(), Some(value.clone()));
        assert_eq!(broker.get_shared("settings", "theme", "b").unwrap(), Some(value));
        assert_eq!(broker.get_shared("settings", "theme", "c").unwrap(), None);
        assert_eq!(
            broker
                .get_shared_or("settings", "theme", "c", SerializedValue::text("light"))
                .unwrap(),
            SerializedValue::text("light")
        );

        assert_eq!(
            actions(&broker),
            vec![
                ("a".to_string(), AccessAction::Created),
                ("a".to_string(), AccessAction::Accessed),
                ("b".to_string(), AccessAction::Accessed),
                ("c".to_string(), AccessAction::Denied),
                ("c".to_string(), AccessAction::Denied),
            ]
        );
    }

    #[test]
    fn test_empty_allow_list_is_public() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        broker
            .set_shared("settings", "theme", SerializedValue::text("dark"), "a", Vec::<String>::new())
            .unwrap();

        assert!(broker.get_shared("settings", "theme", "anyone").unwrap().is_some());
    }

    #[test]
    fn test_access_log_is_bounded() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        broker
            .set_shared("settings", "theme", SerializedValue::text("dark"), "a", ["b"])
            .unwrap();
        for _ in 0..60 {
            broker.get_shared("settings", "theme", "b").unwrap();
        }

        let log = broker.access_log("settings", "theme").unwrap();
        assert_eq!(log.len(), ACCESS_LOG_CAPACITY);
        assert!(log.iter().all(|e| e.action == AccessAction::Accessed));
    }

    #[test]
    fn test_replace_keeps_log_and_created_at() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        let first = broker
            .set_shared("settings", "theme", SerializedValue::text("dark"), "a", ["b"])
            .unwrap();
        broker.get_shared("settings", "theme", "b").unwrap();

        let replaced = broker
            .set_shared("settings", "theme", SerializedValue::text("light"), "a", ["c"])
            .unwrap();
        assert_eq!(replaced.created_at, first.created_at);
        assert_eq!(replaced.access_log.len(), 3);
        assert_eq!(broker.get_shared("settings", "theme", "b").unwrap(), None);
        assert_eq!(
            broker.get_shared("settings", "theme", "c").unwrap(),
            Some(SerializedValue::text("light"))
        );
    }

    #[test]
    fn test_replace_by_another_plugin_takes_ownership() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        broker
            .set_shared("settings", "theme", SerializedValue::text("dark"), "a", ["b"])
            .unwrap();

        let replaced = broker
            .set_shared("settings", "theme", SerializedValue::text("neon"), "c", Vec::<String>::new())
            .unwrap();
        assert_eq!(replaced.owner_plugin, "c");
        assert!(replaced.allowed_plugins.is_empty());

        assert_eq!(
            broker.get_shared("settings", "theme", "c").unwrap(),
            Some(SerializedValue::text("neon"))
        );
        assert_eq!(
            broker.get_shared("settings", "theme", "anyone").unwrap(),
            Some(SerializedValue::text("neon"))
        );
        assert_eq!(
            actions(&broker)[..2],
            [
                ("a".to_string(), AccessAction::Created),
                ("c".to_string(), AccessAction::Created),
            ]
        );
    }

    #[test]
    fn test_remove_shared_owner_only() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        broker
            .set_shared("settings", "theme", SerializedValue::text("dark"), "a", ["b"])
            .unwrap();

        assert!(matches!(
            broker.remove_shared("settings", "theme", "b"),
            Err(StateError::PermissionDenied { .. })
        ));
        assert!(broker.remove_shared("settings", "theme", "a").unwrap());
        assert!(!broker.remove_shared("settings", "theme", "a").unwrap());
        assert_eq!(broker.get_shared("settings", "theme", "a").unwrap(), None);
    }

    #[test]
    fn test_namespaces_and_keys() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        broker
            .set_shared("settings", "theme", SerializedValue::text("dark"), "a", ["b"])
            .unwrap();
        broker
            .set_shared("settings", "font", SerializedValue::text("mono"), "a", ["b"])
            .unwrap();
        broker
            .set_shared("cache", "token", SerializedValue::opaque(vec![1, 2]), "b", ["a"])
            .unwrap();

        assert_eq!(broker.namespaces().unwrap(), vec!["cache", "settings"]);
        assert_eq!(broker.keys("settings").unwrap(), vec!["font", "theme"]);
    }

    #[test]
    fn test_missing_entry() {
        let temp = TempDir::new().unwrap();
        let broker = broker(&temp);
        assert_eq!(broker.get_shared("settings", "nope", "a").unwrap(), None);
        assert!(broker.access_log("settings", "nope").unwrap().is_empty());
    }
}
