//! Best-effort syntax checking for plugin source.
//!
//! The check never blocks a snapshot: a failure only marks the snapshot as
//! `syntax_valid = false`, which the rollback controller then refuses to
//! restore unless forced. Hosts that can parse their plugin language plug in
//! a real parser through [`SyntaxCheck`].

/// A syntax checker for plugin source text.
///
/// Closures `Fn(&str) -> Result<(), String>` implement this trait.
///
/// # Examples
///
/// ```
/// use aether_snapshots::SyntaxCheck;
///
/// let non_empty = |content: &str| {
///     if content.trim().is_empty() { Err("empty plugin".to_string()) } else { Ok(()) }
/// };
/// assert!(non_empty.check("x = 1").is_ok());
/// assert!(non_empty.check("  ").is_err());
/// ```
pub trait SyntaxCheck: Send + Sync {
    /// Returns `Err` with a human-readable reason if `content` is invalid.
    ///
    /// # Errors
    ///
    /// Returns the reason the content was rejected.
    fn check(&self, content: &str) -> Result<(), String>;
}

impl<F> SyntaxCheck for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn check(&self, content: &str) -> Result<(), String> {
        self(content)
    }
}

/// Default checker: balanced brackets and terminated string literals.
///
/// Understands `#` line comments, backslash escapes, and triple-quoted
/// strings, which covers `.aether` and Python-style plugins.
///
/// # Examples
///
/// ```
/// use aether_snapshots::{DelimiterCheck, SyntaxCheck};
///
/// assert!(DelimiterCheck.check("def run(): return 'hi'").is_ok());
/// assert!(DelimiterCheck.check("def run(: return 'hi'").is_err());
/// assert!(DelimiterCheck.check("x = 'unterminated").is_err());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterCheck;

impl SyntaxCheck for DelimiterCheck {
    fn check(&self, content: &str) -> Result<(), String> {
        let chars: Vec<char> = content.chars().collect();
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut line = 1;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '\n' => line += 1,
                '#' => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '"' | '\'' => {
                    let start_line = line;
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    i += if triple { 3 } else { 1 };
                    let mut closed = false;
                    while i < chars.len() {
                        match chars[i] {
                            '\\' => i += 1,
                            '\n' if !triple => break,
                            '\n' => line += 1,
                            q if q == c
                                && (!triple
                                    || (chars.get(i + 1) == Some(&c)
                                        && chars.get(i + 2) == Some(&c))) =>
                            {
                                i += if triple { 3 } else { 1 };
                                closed = true;
                                break;
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                    if !closed {
                        return Err(format!("unterminated string literal starting on line {start_line}"));
                    }
                    continue;
                }
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            return Err(format!(
                                "'{c}' on line {line} does not match '{open}' from line {open_line}"
                            ));
                        }
                        None => return Err(format!("unexpected '{c}' on line {line}")),
                    }
                }
                _ => {}
            }
            i += 1;
        }

        match stack.pop() {
            Some((open, open_line)) => Err(format!("unclosed '{open}' from line {open_line}")),
            None => Ok(()),
        }
    }
}
