//! Per-key mutual exclusion.
//!
//! Components serialize mutating operations per plugin name (or per
//! namespace/key) rather than behind one global lock, so unrelated plugins
//! never wait on each other. The table lives in the [`StoreHandle`], so every
//! component opened on the same handle excludes the others.
//!
//! [`StoreHandle`]: crate::StoreHandle

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Which component a lock key belongs to.
///
/// Scopes keep equal keys of different components apart: the snapshot lock
/// of plugin `greeter` never blocks its state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// Snapshot history of one plugin.
    Snapshots,
    /// State entries of one plugin.
    State,
    /// One context record.
    Context,
    /// One shared-state entry.
    Shared,
}

impl LockScope {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Snapshots => "snapshots",
            Self::State => "state",
            Self::Context => "context",
            Self::Shared => "shared",
        }
    }
}

/// Table of mutexes keyed by string.
///
/// Cloning shares the table. Slots are created on first use and dropped
/// once no thread holds or waits for them.
///
/// # Examples
///
/// ```
/// use aether_core::{KeyedLocks, LockScope};
///
/// let locks = KeyedLocks::new();
/// let value = locks.with_scoped_lock(LockScope::State, "greeter", || 40 + 2);
/// assert_eq!(value, 42);
/// assert_eq!(locks.key_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("keys", &self.key_count())
            .finish()
    }
}

impl KeyedLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the mutex for `key`.
    ///
    /// The mutex is not reentrant: `f` must not lock the same key again.
    /// A poisoned mutex is recovered, since it guards no data of its own.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.to_string()).or_default())
        };

        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // New holders clone the slot under the table lock, so a count of two
        // (the table and `slot`) means nobody else holds or awaits it.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&slot) == 2
            && table.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            table.remove(key);
        }
        result
    }

    /// Runs `f` while holding the mutex for `key` within `scope`.
    pub fn with_scoped_lock<T>(&self, scope: LockScope, key: &str, f: impl FnOnce() -> T) -> T {
        self.with_lock(&format!("{}\0{key}", scope.prefix()), f)
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..50 {
                        locks.with_lock("plugin", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.key_count(), 0);
    }

    #[test]
    fn test_clones_share_table() {
        let locks = KeyedLocks::new();
        let other = locks.clone();
        let held = locks.with_lock("a", || other.with_lock("b", || other.key_count()));
        assert_eq!(held, 2);
    }

    #[test]
    fn test_released_slots_are_dropped() {
        let locks = KeyedLocks::new();
        for i in 0..100 {
            locks.with_lock(&format!("key{i}"), || ());
        }
        assert_eq!(locks.key_count(), 0);
    }

    #[test]
    fn test_scopes_do_not_collide() {
        let locks = KeyedLocks::new();
        let nested = locks.with_scoped_lock(LockScope::Snapshots, "greeter", || {
            locks.with_scoped_lock(LockScope::State, "greeter", || "ok")
        });
        assert_eq!(nested, "ok");
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let nested = locks.with_lock("a", || locks.with_lock("b", || "ok"));
        assert_eq!(nested, "ok");
    }
}
