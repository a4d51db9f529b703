//! Per-plugin context records.
//!
//! A context record accumulates what a plugin has seen in one named context:
//! its interaction history, the inputs that worked and the ones that did not,
//! user preferences, and free-form notes. Lists grow by append-and-trim, so a
//! record never exceeds [`HISTORY_CAPACITY`] interactions,
//! [`SUCCESS_PATTERN_CAPACITY`] success patterns, or
//! [`FAILURE_PATTERN_CAPACITY`] failure patterns. Records are only deleted by
//! [`ContextStore::cleanup_stale`].

use crate::error::{Result, StateError};
use crate::rows::{load_rows, populated_subdirs};
use aether_core::{
    FAILURE_PATTERN_CAPACITY, HISTORY_CAPACITY, LockScope, SUCCESS_PATTERN_CAPACITY, StoreHandle,
    VALUE_FORMAT_VERSION, append_bounded, dir_size, file_key, read_versioned_json,
    remove_file_if_exists, validate_name, write_json_atomic,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Longest prefix of an input kept as a pattern.
const PATTERN_MAX_CHARS: usize = 80;

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// What the plugin was asked.
    pub input: String,
    /// What it answered.
    pub response: String,
    /// Whether the exchange succeeded.
    pub success: bool,
    /// Optional user feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl Interaction {
    /// Creates an interaction stamped with the current time.
    #[must_use]
    pub fn new(
        input: impl Into<String>,
        response: impl Into<String>,
        success: bool,
        feedback: Option<String>,
    ) -> Self {
        Self {
            input: input.into(),
            response: response.into(),
            success,
            feedback,
            at: Utc::now(),
        }
    }

    /// The pattern this interaction contributes: its trimmed input, truncated.
    ///
    /// # Examples
    ///
    /// ```
    /// use aether_state::Interaction;
    ///
    /// let interaction = Interaction::new("  weather in Oslo  ", "Rain", true, None);
    /// assert_eq!(interaction.pattern(), "weather in Oslo");
    /// ```
    #[must_use]
    pub fn pattern(&self) -> String {
        self.input.trim().chars().take(PATTERN_MAX_CHARS).collect()
    }
}

/// Accumulated context of one plugin in one named context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Row layout version.
    pub format_version: u32,
    /// Plugin owning the record.
    pub plugin_name: String,
    /// Context name.
    pub context_id: String,
    /// Most recent interactions, oldest first.
    #[serde(default)]
    pub history: Vec<Interaction>,
    /// Inputs of recent successful interactions, oldest first.
    #[serde(default)]
    pub success_patterns: Vec<String>,
    /// Inputs of recent failed interactions, oldest first.
    #[serde(default)]
    pub failure_patterns: Vec<String>,
    /// User preferences.
    #[serde(default)]
    pub preferences: BTreeMap<String, serde_json::Value>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// Sessions that updated this record.
    pub session_count: u64,
    /// Interactions ever recorded, including those trimmed from `history`.
    pub total_interactions: u64,
    /// Successful interactions ever recorded.
    pub successful_interactions: u64,
    /// First write, or load time for an empty record.
    pub created_at: DateTime<Utc>,
    /// Latest write.
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn empty(plugin_name: &str, context_id: &str) -> Self {
        let now = Utc::now();
        Self {
            format_version: VALUE_FORMAT_VERSION,
            plugin_name: plugin_name.to_string(),
            context_id: context_id.to_string(),
            history: Vec::new(),
            success_patterns: Vec::new(),
            failure_patterns: Vec::new(),
            preferences: BTreeMap::new(),
            notes: String::new(),
            session_count: 0,
            total_interactions: 0,
            successful_interactions: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fraction of all recorded interactions that succeeded; 0.0 if there are none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_interactions == 0 {
            0.0
        } else {
            self.successful_interactions as f64 / self.total_interactions as f64
        }
    }

    fn record(&mut self, interaction: Interaction) {
        let pattern = interaction.pattern();
        self.total_interactions += 1;
        if interaction.success {
            self.successful_interactions += 1;
            append_bounded(&mut self.success_patterns, [pattern], SUCCESS_PATTERN_CAPACITY);
        } else {
            append_bounded(&mut self.failure_patterns, [pattern], FAILURE_PATTERN_CAPACITY);
        }
        append_bounded(&mut self.history, [interaction], HISTORY_CAPACITY);
    }
}

/// Changes merged into a context record by [`ContextStore::update_context`].
///
/// # Examples
///
/// ```
/// use aether_state::{ContextUpdate, Interaction};
///
/// let update = ContextUpdate::new()
///     .interaction(Interaction::new("hello", "hi there", true, None))
///     .preference("language", "en")
///     .notes("prefers short answers");
/// assert_eq!(update.history.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextUpdate {
    /// Interactions to append.
    pub history: Vec<Interaction>,
    /// Success patterns to append.
    pub success_patterns: Vec<String>,
    /// Failure patterns to append.
    pub failure_patterns: Vec<String>,
    /// Preferences to insert or overwrite.
    pub preferences: BTreeMap<String, serde_json::Value>,
    /// Replacement notes, if any.
    pub notes: Option<String>,
}

impl ContextUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one interaction.
    #[must_use]
    pub fn interaction(mut self, interaction: Interaction) -> Self {
        self.history.push(interaction);
        self
    }

    /// Appends one success pattern.
    #[must_use]
    pub fn success_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.success_patterns.push(pattern.into());
        self
    }

    /// Appends one failure pattern.
    #[must_use]
    pub fn failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failure_patterns.push(pattern.into());
        self
    }

    /// Sets one preference.
    #[must_use]
    pub fn preference(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.preferences.insert(key.into(), value.into());
        self
    }

    /// Replaces the notes.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Persistent store of context records.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
/// use aether_state::{ContextStore, ContextUpdate};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let contexts = ContextStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
///
/// let record = contexts.get_context("greeter", "chat")?;
/// assert_eq!(record.session_count, 0);
///
/// contexts.update_context("greeter", "chat", ContextUpdate::new().preference("tone", "formal"))?;
/// let record = contexts.get_context("greeter", "chat")?;
/// assert_eq!(record.session_count, 1);
/// assert_eq!(record.preferences["tone"], "formal");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContextStore {
    handle: StoreHandle,
}

impl ContextStore {
    /// Creates a context store.
    #[must_use]
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Returns the record, or an empty one if none has been saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the row exists but cannot be read.
    pub fn get_context(&self, plugin_name: &str, context_id: &str) -> Result<ContextRecord> {
        validate_name("plugin name", plugin_name)?;
        Ok(self
            .load(plugin_name, context_id)?
            .unwrap_or_else(|| ContextRecord::empty(plugin_name, context_id)))
    }

    /// Merges `update` into the record and counts a new session.
    ///
    /// Lists are appended and trimmed to capacity, dropping the oldest
    /// entries. Preferences are inserted or overwritten; notes are replaced
    /// when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    pub fn update_context(
        &self,
        plugin_name: &str,
        context_id: &str,
        update: ContextUpdate,
    ) -> Result<ContextRecord> {
        self.modify(plugin_name, context_id, |record| {
            append_bounded(&mut record.history, update.history, HISTORY_CAPACITY);
            append_bounded(
                &mut record.success_patterns,
                update.success_patterns,
                SUCCESS_PATTERN_CAPACITY,
            );
            append_bounded(
                &mut record.failure_patterns,
                update.failure_patterns,
                FAILURE_PATTERN_CAPACITY,
            );
            record.preferences.extend(update.preferences);
            if let Some(notes) = update.notes {
                record.notes = notes;
            }
            record.session_count += 1;
        })
    }

    /// Appends one interaction without counting a new session.
    ///
    /// The interaction's [`pattern`](Interaction::pattern) is added to the
    /// success or failure patterns, and the interaction tallies are updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    pub fn record_interaction(
        &self,
        plugin_name: &str,
        context_id: &str,
        interaction: Interaction,
    ) -> Result<ContextRecord> {
        self.modify(plugin_name, context_id, |record| record.record(interaction))
    }

    /// Lists the context ids saved for a plugin, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin directory cannot be read.
    pub fn list_contexts(&self, plugin_name: &str) -> Result<Vec<String>> {
        validate_name("plugin name", plugin_name)?;
        let mut ids: Vec<String> = load_rows::<ContextRecord>(&self.plugin_dir(plugin_name))?
            .into_iter()
            .map(|(_, record)| record.context_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Deletes every record, of any plugin, not updated within `max_age`.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error; records removed before it stay removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Ok(0);
        };

        let mut removed = 0;
        for plugin_name in populated_subdirs(&self.handle.context_dir())? {
            for (path, record) in load_rows::<ContextRecord>(&self.plugin_dir(&plugin_name))? {
                if record.updated_at >= cutoff {
                    continue;
                }
                let key = lock_key(&record.plugin_name, &record.context_id);
                let deleted = self.with_record_lock(&key, || -> Result<bool> {
                    // Re-read under the lock; the record may have been updated since the scan.
                    match read_versioned_json::<ContextRecord>(&path)? {
                        Some(current) if current.updated_at < cutoff => {
                            Ok(remove_file_if_exists(&path)?)
                        }
                        _ => Ok(false),
                    }
                })?;
                if deleted {
                    removed += 1;
                }
            }
        }

        tracing::info!("Removed {} stale context records", removed);
        Ok(removed)
    }

    /// Bytes persisted for a plugin, across its context records and state entries.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid plugin name.
    pub fn persisted_size(&self, plugin_name: &str) -> Result<u64> {
        validate_name("plugin name", plugin_name)?;
        Ok(dir_size(&self.plugin_dir(plugin_name))
            + dir_size(&self.handle.state_dir().join(plugin_name)))
    }

    fn modify(
        &self,
        plugin_name: &str,
        context_id: &str,
        change: impl FnOnce(&mut ContextRecord),
    ) -> Result<ContextRecord> {
        validate_name("plugin name", plugin_name)?;

        self.with_record_lock(&lock_key(plugin_name, context_id), || {
            let mut record = self
                .load(plugin_name, context_id)?
                .unwrap_or_else(|| ContextRecord::empty(plugin_name, context_id));
            change(&mut record);
            record.updated_at = Utc::now();

            write_json_atomic(&self.row_path(plugin_name, context_id), &record)?;
            tracing::debug!(
                "Saved context {}/{} ({} interactions, session {})",
                plugin_name,
                context_id,
                record.history.len(),
                record.session_count
            );
            Ok(record)
        })
    }

    fn load(&self, plugin_name: &str, context_id: &str) -> Result<Option<ContextRecord>> {
        let path = self.row_path(plugin_name, context_id);
        let Some(record) = read_versioned_json::<ContextRecord>(&path)? else {
            return Ok(None);
        };
        if record.plugin_name != plugin_name || record.context_id != context_id {
            return Err(StateError::InvalidRecord {
                path,
                reason: format!("row holds {}/{}", record.plugin_name, record.context_id),
            });
        }
        Ok(Some(record))
    }

    fn with_record_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        self.handle.locks().with_scoped_lock(LockScope::Context, key, f)
    }

    fn plugin_dir(&self, plugin_name: &str) -> PathBuf {
        self.handle.context_dir().join(plugin_name)
    }

    fn row_path(&self, plugin_name: &str, context_id: &str) -> PathBuf {
        self.plugin_dir(plugin_name)
            .join(format!("{}.json", file_key(context_id)))
    }
}

fn lock_key(plugin_name: &str, context_id: &str) -> String {
    format!("{plugin_name}\0{context_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::PersistenceConfig;
    use std::fs;
    use tempfile::TempDir;

    fn contexts(temp: &TempDir) -> ContextStore {
        ContextStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path())).unwrap())
    }

    #[test]
    fn test_missing_context_is_empty_and_not_persisted() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);

        let record = store.get_context("greeter", "chat").unwrap();
        assert!(record.history.is_empty());
        assert_eq!(record.session_count, 0);
        assert!(store.list_contexts("greeter").unwrap().is_empty());
    }

    #[test]
    fn test_update_merges_and_counts_sessions() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);

        store
            .update_context(
                "greeter",
                "chat",
                ContextUpdate::new()
                    .preference("tone", "formal")
                    .preference("lang", "en")
                    .notes("first"),
            )
            .unwrap();
        let record = store
            .update_context(
                "greeter",
                "chat",
                ContextUpdate::new()
                    .preference("tone", "casual")
                    .success_pattern("hello"),
            )
            .unwrap();

        assert_eq!(record.session_count, 2);
        assert_eq!(record.preferences["tone"], "casual");
        assert_eq!(record.preferences["lang"], "en");
        assert_eq!(record.notes, "first");
        assert_eq!(record.success_patterns, vec!["hello"]);
        assert_eq!(store.get_context("greeter", "chat").unwrap(), record);
    }

    #[test]
    fn test_history_is_trimmed_to_most_recent() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);

        for i in 0..150 {
            store
                .update_context(
                    "greeter",
                    "chat",
                    ContextUpdate::new().interaction(Interaction::new(format!("q{i}"), "a", true, None)),
                )
                .unwrap();
        }

        let record = store.get_context("greeter", "chat").unwrap();
        assert_eq!(record.history.len(), HISTORY_CAPACITY);
        assert_eq!(record.history.first().unwrap().input, "q50");
        assert_eq!(record.history.last().unwrap().input, "q149");
        assert_eq!(record.session_count, 150);
    }

    #[test]
    fn test_pattern_lists_are_bounded() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);

        let mut update = ContextUpdate::new();
        for i in 0..60 {
            update = update.success_pattern(format!("s{i}")).failure_pattern(format!("f{i}"));
        }
        let record = store.update_context("greeter", "chat", update).unwrap();

        assert_eq!(record.success_patterns.len(), SUCCESS_PATTERN_CAPACITY);
        assert_eq!(record.failure_patterns.len(), FAILURE_PATTERN_CAPACITY);
        assert_eq!(record.success_patterns[0], "s10");
        assert_eq!(record.failure_patterns[0], "f30");
    }

    #[test]
    fn test_record_interaction_tallies_without_session() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);

        store
            .record_interaction("greeter", "chat", Interaction::new("hi", "hello", true, None))
            .unwrap();
        let record = store
            .record_interaction(
                "greeter",
                "chat",
                Interaction::new("bye", "??", false, Some("wrong".to_string())),
            )
            .unwrap();

        assert_eq!(record.session_count, 0);
        assert_eq!(record.total_interactions, 2);
        assert_eq!(record.successful_interactions, 1);
        assert!((record.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(record.success_patterns, vec!["hi"]);
        assert_eq!(record.failure_patterns, vec!["bye"]);
    }

    #[test]
    fn test_list_contexts() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);
        store.update_context("greeter", "chat", ContextUpdate::new()).unwrap();
        store.update_context("greeter", "admin/ops", ContextUpdate::new()).unwrap();
        store.update_context("weather", "chat", ContextUpdate::new()).unwrap();

        assert_eq!(store.list_contexts("greeter").unwrap(), vec!["admin/ops", "chat"]);
    }

    #[test]
    fn test_cleanup_stale() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);
        store.update_context("greeter", "old", ContextUpdate::new()).unwrap();
        store.update_context("weather", "fresh", ContextUpdate::new()).unwrap();

        let path = store.row_path("greeter", "old");
        let mut row: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        row["updated_at"] = serde_json::json!((Utc::now() - Duration::days(30)).to_rfc3339());
        fs::write(&path, serde_json::to_vec(&row).unwrap()).unwrap();

        assert_eq!(store.cleanup_stale(Duration::days(7)).unwrap(), 1);
        assert!(store.list_contexts("greeter").unwrap().is_empty());
        assert_eq!(store.list_contexts("weather").unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_persisted_size_grows() {
        let temp = TempDir::new().unwrap();
        let store = contexts(&temp);
        assert_eq!(store.persisted_size("greeter").unwrap(), 0);

        store
            .update_context("greeter", "chat", ContextUpdate::new().notes("x".repeat(1000)))
            .unwrap();
        assert!(store.persisted_size("greeter").unwrap() > 1000);
    }
}
