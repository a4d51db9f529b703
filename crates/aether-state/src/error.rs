//! Error types for state, context, and shared-state operations.

use aether_core::ErrorKind;
use std::path::PathBuf;

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while reading or writing plugin state.
///
/// Reads of shared state by a plugin that is not allowed are not errors:
/// they return the default and record a `denied` access. Only removal of a
/// shared entry by a non-owner raises [`StateError::PermissionDenied`].
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    /// A plugin tried to remove a shared entry it does not own.
    #[error("Plugin {requester} may not remove shared entry {namespace}/{key} owned by {owner}")]
    PermissionDenied {
        /// Plugin that made the request
        requester: String,
        /// Namespace of the entry
        namespace: String,
        /// Key of the entry
        key: String,
        /// Current owner
        owner: String,
    },

    /// A persisted row does not describe the entry it was loaded for.
    #[error("Invalid state record {path}: {reason}")]
    InvalidRecord {
        /// Row that could not be used
        path: PathBuf,
        /// Why it is invalid
        reason: String,
    },

    /// Error from the shared persistence infrastructure.
    #[error(transparent)]
    Core(#[from] aether_core::Error),
}

impl StateError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidRecord { .. } => ErrorKind::Format,
            Self::Core(inner) => inner.kind(),
        }
    }

    /// Returns true if the caller can fix the problem by changing its request.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::PermissionDenied { .. } => true,
            Self::InvalidRecord { .. } => false,
            Self::Core(inner) => inner.is_recoverable(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Core(aether_core::Error::io(context, source))
    }
}

impl From<serde_json::Error> for StateError {
    fn from(source: serde_json::Error) -> Self {
        Self::Core(source.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied() {
        let error = StateError::PermissionDenied {
            requester: "weather".to_string(),
            namespace: "settings".to_string(),
            key: "theme".to_string(),
            owner: "greeter".to_string(),
        };

        assert_eq!(error.kind(), ErrorKind::PermissionDenied);
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("settings/theme"));
        assert!(error.to_string().contains("greeter"));
    }

    #[test]
    fn test_core_error_passes_through() {
        let error: StateError = aether_core::Error::UnsupportedFormat {
            found: 2,
            expected: 1,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::Format);
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("Unsupported format version 2"));
    }

    #[test]
    fn test_io_helper() {
        let error = StateError::io("reading row", std::io::Error::other("disk gone"));
        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(error.to_string().contains("reading row"));
    }
}
