//! Capacity limits for append-only lists.

/// Interaction history kept per context record.
pub const HISTORY_CAPACITY: usize = 100;

/// Success patterns kept per context record.
pub const SUCCESS_PATTERN_CAPACITY: usize = 50;

/// Failure patterns kept per context record.
pub const FAILURE_PATTERN_CAPACITY: usize = 30;

/// Access-log entries kept per shared-state entry.
pub const ACCESS_LOG_CAPACITY: usize = 50;

/// Appends `incoming` to `items`, then drops the oldest entries until at most
/// `capacity` remain.
///
/// # Examples
///
/// ```
/// use aether_core::append_bounded;
///
/// let mut items = vec![1, 2, 3];
/// append_bounded(&mut items, [4, 5], 4);
/// assert_eq!(items, vec![2, 3, 4, 5]);
/// ```
pub fn append_bounded<T>(items: &mut Vec<T>, incoming: impl IntoIterator<Item = T>, capacity: usize) {
    items.extend(incoming);
    if items.len() > capacity {
        let excess = items.len() - capacity;
        items.drain(..excess);
    }
}
