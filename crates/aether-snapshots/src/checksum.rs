//! Blake3 checksums for snapshot content.
//!
//! Every catalog row records the checksum of its content file in the form
//! `"blake3:<hex>"`. Content is verified whenever it is read back, so a
//! snapshot file altered on disk is reported instead of silently restored.

use crate::error::{Result, SnapshotError};

/// Compares two strings without short-circuiting on the first difference.
///
/// # Examples
///
/// ```
/// use aether_snapshots::checksum::constant_time_compare;
///
/// assert!(constant_time_compare("blake3:abc123", "blake3:abc123"));
/// assert!(!constant_time_compare("blake3:abc123", "blake3:def456"));
/// assert!(!constant_time_compare("blake3:abc", "blake3:abcdef"));
/// ```
#[must_use]
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let len_match = a.len() == b.len();
    let (bytes_a, bytes_b) = (a.as_bytes(), b.as_bytes());

    let mut diff = 0u8;
    for i in 0..a.len().max(b.len()) {
        diff |= bytes_a.get(i).copied().unwrap_or(0) ^ bytes_b.get(i).copied().unwrap_or(0);
    }

    len_match && diff == 0
}

/// Calculates the Blake3 checksum of `data` as `"blake3:<hex>"`.
///
/// # Examples
///
/// ```
/// use aether_snapshots::checksum::calculate_checksum;
///
/// let checksum = calculate_checksum(b"def run(): return 'hi'");
/// assert!(checksum.starts_with("blake3:"));
/// assert_eq!(checksum.len(), 71);
/// ```
#[must_use]
pub fn calculate_checksum(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// Verifies that `data` matches `expected`.
///
/// # Errors
///
/// Returns [`SnapshotError::ChecksumMismatch`] naming `path` if the checksums differ.
pub fn verify_checksum(data: &[u8], expected: &str, path: &str) -> Result<()> {
    let actual = calculate_checksum(data);
    if !constant_time_compare(&actual, expected) {
        return Err(SnapshotError::ChecksumMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("", ""));
        assert!(constant_time_compare("same", "same"));
        assert!(!constant_time_compare("test", "best"));
        assert!(!constant_time_compare("long", "sh"));
    }

    #[test]
    fn test_checksum_is_deterministic() {
        assert_eq!(calculate_checksum(b"abc"), calculate_checksum(b"abc"));
        assert_ne!(calculate_checksum(b"abc"), calculate_checksum(b"abd"));
    }

    #[test]
    fn test_verify_checksum() {
        let data = b"plugin source";
        let checksum = calculate_checksum(data);
        assert!(verify_checksum(data, &checksum, "a.aether").is_ok());

        match verify_checksum(b"tampered", &checksum, "a.aether") {
            Err(SnapshotError::ChecksumMismatch { path, expected, .. }) => {
                assert_eq!(path, "a.aether");
                assert_eq!(expected, checksum);
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }
}
