//! Error types shared by every persistence component.
//!
//! Component crates define their own error enums and wrap this one through
//! `#[from]`, so a caller can always ask for the [`ErrorKind`] of a failure
//! instead of matching on a bare boolean.
//!
//! # Examples
//!
//! ```
//! use aether_core::{Error, ErrorKind, validate_name};
//!
//! let err = validate_name("plugin name", "../escape").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InvalidInput);
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of persistence failures.
///
/// Every component error maps onto one of these kinds, which lets the
/// surrounding runtime tell "not found" apart from "denied" or "I/O failure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced snapshot, state row, or shared entry is absent.
    NotFound,
    /// Content failed validation and the caller did not override it.
    Validation,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
    /// Disk read or write failed.
    Io,
    /// The metadata catalog could not be opened or initialized.
    CatalogCorruption,
    /// A persisted row has an unknown or malformed format.
    Format,
    /// A caller supplied an invalid argument.
    InvalidInput,
}

/// Errors raised by the shared persistence infrastructure.
#[derive(Error, Debug)]
pub enum Error {
    /// The catalog marker is missing, unreadable, or of an unknown version.
    ///
    /// This is fatal when opening a [`StoreHandle`](crate::StoreHandle).
    /// Recovering requires an explicit
    /// [`StoreHandle::reinitialize`](crate::StoreHandle::reinitialize).
    #[error("Catalog corrupted at {path}: {reason}")]
    CatalogCorruption {
        /// Location of the catalog marker
        path: PathBuf,
        /// Why the catalog could not be opened
        reason: String,
    },

    /// A plugin name, namespace, or similar identifier is unusable as a path component.
    #[error("Invalid {field}: {name:?} ({reason})")]
    InvalidName {
        /// Which identifier was rejected
        field: String,
        /// The rejected value
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration is invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
    },

    /// I/O failure with the operation that triggered it.
    #[error("IO error while {context}: {source}")]
    Io {
        /// What the store was doing
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding of a persisted row failed.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Description of the serialization failure
        message: String,
        /// Underlying serde error
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A persisted row was written by an unknown format version.
    #[error("Unsupported format version {found} (expected {expected})")]
    UnsupportedFormat {
        /// Version found in the row
        found: u32,
        /// Version this build understands
        expected: u32,
    },
}

impl Error {
    /// Wraps an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CatalogCorruption { .. } => ErrorKind::CatalogCorruption,
            Self::InvalidName { .. } | Self::ConfigError { .. } => ErrorKind::InvalidInput,
            Self::Io { .. } => ErrorKind::Io,
            Self::SerializationError { .. } | Self::UnsupportedFormat { .. } => ErrorKind::Format,
        }
    }

    /// Returns `true` if the caller can fix the problem by changing its input.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidName { .. } | Self::ConfigError { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::SerializationError {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_catalog_corruption_display() {
        let err = Error::CatalogCorruption {
            path: PathBuf::from("/data/catalog.json"),
            reason: "invalid JSON".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("Catalog corrupted"));
        assert!(display.contains("catalog.json"));
        assert_eq!(err.kind(), ErrorKind::CatalogCorruption);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_io_error_keeps_context() {
        let err = Error::io("writing row", io::Error::other("disk full"));
        let display = err.to_string();
        assert!(display.contains("writing row"));
        assert!(display.contains("disk full"));
        assert_eq!(err.kind(), ErrorKind::Io);

        use std::error::Error as _;
        assert!(err.source().is_some());
    }

    #[test]
    fn test_invalid_name_is_recoverable() {
        let err = Error::InvalidName {
            field: "plugin name".to_string(),
            name: "a/b".to_string(),
            reason: "contains path separators".to_string(),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let err: Error = json_error.into();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_unsupported_format_display() {
        let err = Error::UnsupportedFormat {
            found: 9,
            expected: 1,
        };
        assert!(err.to_string().contains('9'));
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
