//! Versioned values stored by the state components.
//!
//! Values are a closed tagged union instead of arbitrary serialized objects:
//! a reader always knows which variant it holds, and every persisted row
//! carries [`VALUE_FORMAT_VERSION`] so unknown layouts are rejected up front.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Layout version written into every persisted state, context, and shared row.
pub const VALUE_FORMAT_VERSION: u32 = 1;

/// Rejects rows written by a different format version.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if `found` differs from
/// [`VALUE_FORMAT_VERSION`].
pub const fn check_format_version(found: u32) -> Result<()> {
    if found == VALUE_FORMAT_VERSION {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat {
            found,
            expected: VALUE_FORMAT_VERSION,
        })
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

/// Reads a persisted row, checking its `format_version` before parsing the rest.
///
/// Returns `None` if the file does not exist.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] for rows of another version, or a
/// serialization error if the row is malformed.
pub fn read_versioned_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(document) = crate::handle::read_json::<serde_json::Value>(path)? else {
        return Ok(None);
    };
    check_format_version(VersionProbe::deserialize(&document)?.format_version)?;
    Ok(Some(serde_json::from_value(document)?))
}

/// A persisted value.
///
/// # Examples
///
/// ```
/// use aether_core::{SerializedValue, ValueTag};
/// use serde_json::json;
///
/// let text = SerializedValue::text("hello");
/// assert_eq!(text.tag(), ValueTag::Text);
/// assert_eq!(text.as_text(), Some("hello"));
///
/// let prefs = SerializedValue::structured("prefs/v1", &json!({"theme": "dark"})).unwrap();
/// assert_eq!(prefs.tag(), ValueTag::Structured);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SerializedValue {
    /// JSON document tagged with the schema it follows.
    Structured(StructuredValue),
    /// Plain UTF-8 text.
    Text(String),
    /// Raw bytes the store does not interpret.
    Opaque(Vec<u8>),
}

/// Schema-tagged JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredValue {
    /// Caller-defined schema identifier, e.g. `"settings/v2"`.
    pub schema: String,
    /// The document itself.
    pub value: serde_json::Value,
}

/// Variant tag of a [`SerializedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTag {
    /// [`SerializedValue::Structured`]
    Structured,
    /// [`SerializedValue::Text`]
    Text,
    /// [`SerializedValue::Opaque`]
    Opaque,
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Structured => "structured",
            Self::Text => "text",
            Self::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

impl SerializedValue {
    /// Serializes `value` to JSON and tags it with `schema`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be represented as JSON.
    pub fn structured<T: Serialize>(schema: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::Structured(StructuredValue {
            schema: schema.into(),
            value: serde_json::to_value(value)?,
        }))
    }

    /// Wraps plain text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Wraps raw bytes.
    #[must_use]
    pub fn opaque(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Opaque(bytes.into())
    }

    /// Returns the variant tag.
    #[must_use]
    pub const fn tag(&self) -> ValueTag {
        match self {
            Self::Structured(_) => ValueTag::Structured,
            Self::Text(_) => ValueTag::Text,
            Self::Opaque(_) => ValueTag::Opaque,
        }
    }

    /// Returns the text if this is a [`SerializedValue::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the bytes if this is a [`SerializedValue::Opaque`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Opaque(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Decodes a structured value into `T`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if this is not a structured value or the
    /// document does not match `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use aether_core::SerializedValue;
    ///
    /// let value = SerializedValue::structured("counter/v1", &41_u32).unwrap();
    /// let n: u32 = value.decode().unwrap();
    /// assert_eq!(n + 1, 42);
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Structured(structured) => Ok(serde_json::from_value(structured.value.clone())?),
            other => Err(Error::SerializationError {
                message: format!("cannot decode a {} value as structured data", other.tag()),
                source: None,
            }),
        }
    }
}
