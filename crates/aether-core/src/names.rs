//! Identifier validation and file keys.
//!
//! Plugin names and namespaces become directory names on disk, so they are
//! checked before any path is built. Free-form keys (state keys, context ids)
//! are never used as paths directly; they are hashed into a file key instead.

use crate::error::{Error, Result};

/// Validates that an identifier is safe to use as a directory name.
///
/// Rejects names that:
/// - Are empty
/// - Are parent directory references (`.` or `..`)
/// - Contain path separators (`/` or `\`)
/// - Contain control characters
///
/// # Errors
///
/// Returns [`Error::InvalidName`] naming `field` if the value is invalid.
///
/// # Examples
///
/// ```
/// use aether_core::validate_name;
///
/// assert!(validate_name("plugin name", "greeter").is_ok());
/// assert!(validate_name("plugin name", "../escape").is_err());
/// assert!(validate_name("namespace", "").is_err());
/// ```
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(Error::InvalidName {
            field: field.to_string(),
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("cannot be empty");
    }

    if name == "." || name == ".." {
        return reject("cannot be '.' or '..'");
    }

    if name.contains('/') || name.contains('\\') {
        return reject("cannot contain path separators");
    }

    if name.chars().any(char::is_control) {
        return reject("cannot contain control characters");
    }

    Ok(())
}

/// Derives a stable file name stem for an arbitrary key.
///
/// The stem is the lowercase hex Blake3 hash of the key, so keys containing
/// separators or other special characters map to safe file names.
///
/// # Examples
///
/// ```
/// use aether_core::file_key;
///
/// let a = file_key("user/preferences");
/// assert_eq!(a, file_key("user/preferences"));
/// assert_ne!(a, file_key("user/preference"));
/// assert_eq!(a.len(), 64);
/// ```
#[must_use]
pub fn file_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}
