//! Interaction memory and self-assessment for plugins.
//!
//! [`CognitiveMemory`] records every interaction twice: in a small in-memory
//! ring buffer that reflects the current process, and in the plugin's
//! persisted context record. Insights and optimization suggestions are
//! derived from both.

use crate::context::{ContextRecord, ContextStore, ContextUpdate, Interaction};
use crate::error::Result;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Interactions kept in memory per plugin.
pub const RECENT_BUFFER_CAPACITY: usize = 20;

/// Context id under which interactions are persisted.
pub const MEMORY_CONTEXT: &str = "cognitive_memory";

/// Patterns reported per list by [`CognitiveMemory::get_insights`].
const INSIGHT_PATTERN_COUNT: usize = 5;

const LOW_SUCCESS_RATE: f64 = 0.7;
const BUSY_INTERACTION_COUNT: u64 = 100;
const FEW_SESSIONS: u64 = 5;
const MEMORY_LIMIT_BYTES: u64 = 1024 * 1024;

/// Summary of what a plugin's memory says about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    /// Interactions ever recorded.
    pub total_interactions: u64,
    /// `successes / total`, 0.0 with no interactions.
    pub success_rate: f64,
    /// Newest success patterns, oldest first.
    pub recent_success_patterns: Vec<String>,
    /// Newest failure patterns, oldest first.
    pub recent_failure_patterns: Vec<String>,
    /// Bytes persisted for the plugin.
    pub memory_usage: u64,
    /// Sessions recorded.
    pub session_count: u64,
}

/// An improvement the plugin's record points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Suggestion {
    /// Success rate is below 70%, including a plugin with no interactions.
    ReviewErrorHandling,
    /// Many interactions spread over few sessions.
    ImproveSessionState,
    /// Recent failures outnumber recent successes.
    RecentPerformanceDecline,
    /// Persisted data exceeds 1 MiB.
    ImplementStateCleanup,
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::ReviewErrorHandling => "Review error handling: success rate is below 70%",
            Self::ImproveSessionState => {
                "Improve session state management: many interactions across few sessions"
            }
            Self::RecentPerformanceDecline => {
                "Recent performance decline: failures outnumber successes"
            }
            Self::ImplementStateCleanup => "Implement state cleanup: persisted data exceeds 1 MiB",
        };
        f.write_str(message)
    }
}

/// Per-plugin interaction memory.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
/// use aether_state::{CognitiveMemory, ContextStore, Suggestion};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let handle = StoreHandle::open(PersistenceConfig::with_root(temp.path()))?;
/// let memory = CognitiveMemory::new(ContextStore::new(handle));
///
/// memory.remember_interaction("greeter", "hello", "hi!", true, None)?;
/// memory.remember_interaction("greeter", "weather?", "no idea", false, Some("wrong plugin"))?;
///
/// let insights = memory.get_insights("greeter")?;
/// assert_eq!(insights.total_interactions, 2);
/// assert!((insights.success_rate - 0.5).abs() < f64::EPSILON);
///
/// let suggestions = memory.suggest_optimizations("greeter")?;
/// assert!(suggestions.contains(&Suggestion::ReviewErrorHandling));
/// # Ok(())
/// # }
/// ```
pub struct CognitiveMemory {
    contexts: ContextStore,
    recent: Mutex<HashMap<String, VecDeque<Interaction>>>,
}

impl fmt::Debug for CognitiveMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins = self
            .recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("CognitiveMemory")
            .field("contexts", &self.contexts)
            .field("plugins_in_memory", &plugins)
            .finish()
    }
}

impl CognitiveMemory {
    /// Creates a memory persisting through `contexts`.
    #[must_use]
    pub fn new(contexts: ContextStore) -> Self {
        Self {
            contexts,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Records one interaction in memory and in the persisted context.
    ///
    /// # Errors
    ///
    /// Returns an error if the context record cannot be saved. The in-memory
    /// buffer is updated only after the record is saved.
    pub fn remember_interaction(
        &self,
        plugin_name: &str,
        input: &str,
        response: &str,
        success: bool,
        feedback: Option<&str>,
    ) -> Result<()> {
        let interaction = Interaction::new(input, response, success, feedback.map(str::to_string));
        self.contexts
            .record_interaction(plugin_name, MEMORY_CONTEXT, interaction.clone())?;

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let buffer = recent.entry(plugin_name.to_string()).or_default();
        if buffer.len() == RECENT_BUFFER_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(interaction);
        Ok(())
    }

    /// Marks the start of a new session for the plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if the context record cannot be saved.
    pub fn begin_session(&self, plugin_name: &str) -> Result<ContextRecord> {
        let record = self
            .contexts
            .update_context(plugin_name, MEMORY_CONTEXT, ContextUpdate::new())?;
        tracing::info!("Session {} started for {}", record.session_count, plugin_name);
        Ok(record)
    }

    /// Interactions held in memory for the plugin, oldest first.
    #[must_use]
    pub fn recent_interactions(&self, plugin_name: &str) -> Vec<Interaction> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin_name)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Summarizes the plugin's recorded interactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the context record cannot be read.
    pub fn get_insights(&self, plugin_name: &str) -> Result<Insights> {
        let record = self.contexts.get_context(plugin_name, MEMORY_CONTEXT)?;
        Ok(Insights {
            total_interactions: record.total_interactions,
            success_rate: record.success_rate(),
            recent_success_patterns: tail(&record.success_patterns, INSIGHT_PATTERN_COUNT),
            recent_failure_patterns: tail(&record.failure_patterns, INSIGHT_PATTERN_COUNT),
            memory_usage: self.contexts.persisted_size(plugin_name)?,
            session_count: record.session_count,
        })
    }

    /// Suggests improvements; every rule is evaluated independently.
    ///
    /// The recent window is the in-memory buffer, or the newest persisted
    /// interactions when this process has seen none for the plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if the context record cannot be read.
    pub fn suggest_optimizations(&self, plugin_name: &str) -> Result<Vec<Suggestion>> {
        let record = self.contexts.get_context(plugin_name, MEMORY_CONTEXT)?;
        let mut suggestions = Vec::new();

        if record.success_rate() < LOW_SUCCESS_RATE {
            suggestions.push(Suggestion::ReviewErrorHandling);
        }
        if record.total_interactions > BUSY_INTERACTION_COUNT && record.session_count < FEW_SESSIONS {
            suggestions.push(Suggestion::ImproveSessionState);
        }

        let mut window = self.recent_interactions(plugin_name);
        if window.is_empty() {
            window = tail(&record.history, RECENT_BUFFER_CAPACITY);
        }
        let failures = window.iter().filter(|i| !i.success).count();
        if failures > window.len() - failures {
            suggestions.push(Suggestion::RecentPerformanceDecline);
        }

        if self.contexts.persisted_size(plugin_name)? > MEMORY_LIMIT_BYTES {
            suggestions.push(Suggestion::ImplementStateCleanup);
        }

        if !suggestions.is_empty() {
            tracing::debug!("Suggestions for {}: {:?}", plugin_name, suggestions);
        }
        Ok(suggestions)
    }
}

fn tail<T: Clone>(items: &[T], count: usize) -> Vec<T> {
    items[items.len().saturating_sub(count)..].to_vec()
}
