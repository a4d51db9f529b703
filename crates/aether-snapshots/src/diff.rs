//! Textual diffs between snapshots.
//!
//! Diffs are computed with `diffy` and rendered into one of three forms.
//! Rendering is a pure function of the two contents and their labels:
//! identical contents always produce an empty string.

use crate::error::Result;
use crate::store::SnapshotStore;
use diffy::{Hunk, Line, Patch};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Output format of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffFormat {
    /// `diff -u` style hunks.
    #[default]
    Unified,
    /// `diff -c` style hunks with separate old and new sections.
    Context,
    /// An HTML `<table>` with one row per line.
    Html,
}

impl fmt::Display for DiffFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unified => write!(f, "unified"),
            Self::Context => write!(f, "context"),
            Self::Html => write!(f, "html"),
        }
    }
}

/// Line counts of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffStats {
    /// Lines present only in the newer content.
    pub added: usize,
    /// Lines present only in the older content.
    pub removed: usize,
    /// Number of hunks.
    pub hunks: usize,
}

impl DiffStats {
    /// True if the contents are identical.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Computes diffs between two snapshots of the same plugin.
///
/// # Examples
///
/// ```
/// use aether_core::{PersistenceConfig, StoreHandle};
/// use aether_snapshots::{DiffEngine, DiffFormat, SnapshotStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let store = SnapshotStore::new(StoreHandle::open(PersistenceConfig::with_root(temp.path()))?);
/// let old = store.create_snapshot("greeter", "say('hi')\n", 0.9, "user", "v1")?;
/// let new = store.create_snapshot("greeter", "say('hello')\n", 0.9, "user", "v2")?;
///
/// let engine = DiffEngine::new(store);
/// let diff = engine.diff("greeter", &old.timestamp_id, &new.timestamp_id, DiffFormat::Unified)?;
/// assert!(diff.contains("-say('hi')"));
/// assert!(diff.contains("+say('hello')"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiffEngine {
    store: SnapshotStore,
}

impl DiffEngine {
    /// Creates a diff engine over a snapshot store.
    #[must_use]
    pub const fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Renders the changes from snapshot `ts_a` to snapshot `ts_b`.
    ///
    /// # Errors
    ///
    /// * [`SnapshotError::SnapshotNotFound`](crate::SnapshotError::SnapshotNotFound) - Either snapshot is absent
    /// * [`SnapshotError::ChecksumMismatch`](crate::SnapshotError::ChecksumMismatch) - Stored content was altered
    pub fn diff(&self, plugin_name: &str, ts_a: &str, ts_b: &str, format: DiffFormat) -> Result<String> {
        let old = self.store.read_content(plugin_name, ts_a)?;
        let new = self.store.read_content(plugin_name, ts_b)?;
        tracing::debug!("Diffing {}@{} -> {} as {}", plugin_name, ts_a, ts_b, format);

        Ok(render_diff(
            &format!("{plugin_name}@{ts_a}"),
            &old,
            &format!("{plugin_name}@{ts_b}"),
            &new,
            format,
        ))
    }

    /// Counts added and removed lines between two snapshots.
    ///
    /// # Errors
    ///
    /// Same as [`diff`](Self::diff).
    pub fn diff_stats(&self, plugin_name: &str, ts_a: &str, ts_b: &str) -> Result<DiffStats> {
        let old = self.store.read_content(plugin_name, ts_a)?;
        let new = self.store.read_content(plugin_name, ts_b)?;
        Ok(diff_stats(&old, &new))
    }
}

/// Counts added and removed lines between two texts.
///
/// # Examples
///
/// ```
/// use aether_snapshots::diff::diff_stats;
///
/// let stats = diff_stats("a\nb\n", "a\nc\nd\n");
/// assert_eq!((stats.added, stats.removed), (2, 1));
/// ```
#[must_use]
pub fn diff_stats(old: &str, new: &str) -> DiffStats {
    let patch = diffy::create_patch(old, new);
    let (added, removed) = patch
        .hunks()
        .iter()
        .flat_map(Hunk::lines)
        .fold((0, 0), |(a, d), line| match line {
            Line::Insert(_) => (a + 1, d),
            Line::Delete(_) => (a, d + 1),
            Line::Context(_) => (a, d),
        });

    DiffStats {
        added,
        removed,
        hunks: patch.hunks().len(),
    }
}

/// Renders a diff between two labelled texts.
///
/// Returns an empty string when the texts are identical.
#[must_use]
pub fn render_diff(old_label: &str, old: &str, new_label: &str, new: &str, format: DiffFormat) -> String {
    let patch = diffy::create_patch(old, new);
    if patch.hunks().is_empty() {
        return String::new();
    }

    match format {
        DiffFormat::Unified => render_unified(old_label, new_label, &patch),
        DiffFormat::Context => render_context(old_label, new_label, &patch),
        DiffFormat::Html => render_html(old_label, new_label, &patch),
    }
}

fn render_unified(old_label: &str, new_label: &str, patch: &Patch<'_, str>) -> String {
    let mut out = format!("--- {old_label}\n+++ {new_label}\n");

    for hunk in patch.hunks() {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk.old_range().start(),
            hunk.old_range().len(),
            hunk.new_range().start(),
            hunk.new_range().len()
        );
        for line in hunk.lines() {
            let (marker, text) = match line {
                Line::Context(text) => (" ", *text),
                Line::Delete(text) => ("-", *text),
                Line::Insert(text) => ("+", *text),
            };
            push_line(&mut out, marker, text);
        }
    }

    out
}

fn render_context(old_label: &str, new_label: &str, patch: &Patch<'_, str>) -> String {
    let mut out = format!("*** {old_label}\n--- {new_label}\n");

    for hunk in patch.hunks() {
        out.push_str("***************\n");
        let marked = mark_context_lines(hunk);

        let old_range = hunk.old_range();
        let _ = writeln!(out, "*** {} ****", context_range(old_range.start(), old_range.len()));
        if marked.iter().any(|(_, line)| matches!(line, Line::Delete(_))) {
            for (marker, line) in &marked {
                match line {
                    Line::Context(text) | Line::Delete(text) => push_line(&mut out, marker, text),
                    Line::Insert(_) => {}
                }
            }
        }

        let new_range = hunk.new_range();
        let _ = writeln!(out, "--- {} ----", context_range(new_range.start(), new_range.len()));
        if marked.iter().any(|(_, line)| matches!(line, Line::Insert(_))) {
            for (marker, line) in &marked {
                match line {
                    Line::Context(text) | Line::Insert(text) => push_line(&mut out, marker, text),
                    Line::Delete(_) => {}
                }
            }
        }
    }

    out
}

/// Pairs each hunk line with its context-diff marker.
///
/// A run of changed lines holding both deletions and insertions is a
/// replacement, and every line of it is marked `! ` on both sides.
fn mark_context_lines<'a>(hunk: &Hunk<'a, str>) -> Vec<(&'static str, Line<'a, str>)> {
    let lines = hunk.lines();
    let mut marked = Vec::with_capacity(lines.len());
    let mut index = 0;

    while index < lines.len() {
        if let Line::Context(text) = lines[index] {
            marked.push(("  ", Line::Context(text)));
            index += 1;
            continue;
        }

        let run_end = lines[index..]
            .iter()
            .position(|line| matches!(line, Line::Context(_)))
            .map_or(lines.len(), |offset| index + offset);
        let run = &lines[index..run_end];
        let replaced = run.iter().any(|line| matches!(line, Line::Delete(_)))
            && run.iter().any(|line| matches!(line, Line::Insert(_)));

        for line in run {
            marked.push(match *line {
                Line::Delete(text) => (if replaced { "! " } else { "- " }, Line::Delete(text)),
                Line::Insert(text) => (if replaced { "! " } else { "+ " }, Line::Insert(text)),
                Line::Context(text) => ("  ", Line::Context(text)),
            });
        }
        index = run_end;
    }

    marked
}

fn render_html(old_label: &str, new_label: &str, patch: &Patch<'_, str>) -> String {
    let mut out = String::from("<table class=\"diff\">\n");
    let _ = writeln!(
        out,
        "<thead><tr><th></th><th></th><th>{} &rarr; {}</th></tr></thead>",
        escape_html(old_label),
        escape_html(new_label)
    );
    out.push_str("<tbody>\n");

    for (index, hunk) in patch.hunks().iter().enumerate() {
        if index > 0 {
            out.push_str("<tr class=\"diff-sep\"><td colspan=\"3\">&hellip;</td></tr>\n");
        }

        let mut old_ln = hunk.old_range().start();
        let mut new_ln = hunk.new_range().start();
        for line in hunk.lines() {
            let (class, old_cell, new_cell, text) = match line {
                Line::Context(text) => {
                    let row = ("diff-context", old_ln.to_string(), new_ln.to_string(), *text);
                    old_ln += 1;
                    new_ln += 1;
                    row
                }
                Line::Delete(text) => {
                    let row = ("diff-delete", old_ln.to_string(), String::new(), *text);
                    old_ln += 1;
                    row
                }
                Line::Insert(text) => {
                    let row = ("diff-insert", String::new(), new_ln.to_string(), *text);
                    new_ln += 1;
                    row
                }
            };
            let _ = writeln!(
                out,
                "<tr class=\"{class}\"><td>{old_cell}</td><td>{new_cell}</td><td>{}</td></tr>",
                escape_html(text.trim_end_matches('\n'))
            );
        }
    }

    out.push_str("</tbody>\n</table>\n");
    out
}

/// Appends one diff line, terminating it even when the source line had no newline.
fn push_line(out: &mut String, marker: &str, text: &str) {
    out.push_str(marker);
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push_str("\n\\ No newline at end of file\n");
    }
}

fn context_range(start: usize, len: usize) -> String {
    match len {
        0 | 1 => start.to_string(),
        _ => format!("{start},{}", start + len - 1),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
