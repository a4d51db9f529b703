//! Configuration for the persistence layer.
//!
//! [`PersistenceConfig`] controls where data lives on disk and the tunables of
//! each component. It can be built in code, through
//! [`PersistenceConfig::builder`], or loaded from a TOML document.
//!
//! # Examples
//!
//! ```
//! use aether_core::PersistenceConfig;
//!
//! let config = PersistenceConfig::builder()
//!     .root_dir("/tmp/aether")
//!     .source_extension("aether")
//!     .state_cache_capacity(64)
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.state_cache_capacity, 64);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration for every persistence component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Root directory holding the catalog, snapshots, and state rows.
    ///
    /// Default: `<data_local_dir>/aetherra/persistence`
    pub root_dir: PathBuf,

    /// File extension used for snapshot content files.
    ///
    /// Default: `"aether"`
    pub source_extension: String,

    /// Number of state entries kept in the in-memory LRU cache.
    ///
    /// Default: 256
    pub state_cache_capacity: usize,

    /// Window, in days, counted as "recent" in snapshot history statistics.
    ///
    /// Default: 7
    pub recent_window_days: i64,

    /// Snapshots kept per plugin when retention runs without an explicit count.
    ///
    /// Default: 10
    pub default_keep_count: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            source_extension: "aether".to_string(),
            state_cache_capacity: 256,
            recent_window_days: 7,
            default_keep_count: 10,
        }
    }
}

fn default_root_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("aetherra")
        .join("persistence")
}

impl PersistenceConfig {
    /// Creates a configuration builder starting from the defaults.
    #[must_use]
    pub fn builder() -> PersistenceConfigBuilder {
        PersistenceConfigBuilder::new()
    }

    /// Creates a default configuration rooted at `root_dir`.
    ///
    /// # Examples
    ///
    /// ```
    /// use aether_core::PersistenceConfig;
    ///
    /// let config = PersistenceConfig::with_root("/tmp/plugins");
    /// assert!(config.root_dir.ends_with("plugins"));
    /// ```
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from TOML. Missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the document is not valid TOML, has
    /// fields of the wrong type, or fails [`validate`](Self::validate).
    ///
    /// # Examples
    ///
    /// ```
    /// use aether_core::PersistenceConfig;
    ///
    /// let config = PersistenceConfig::from_toml_str(r#"
    ///     root_dir = "/var/lib/aether"
    ///     state_cache_capacity = 32
    /// "#).unwrap();
    /// assert_eq!(config.state_cache_capacity, 32);
    /// assert_eq!(config.source_extension, "aether");
    /// ```
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Self = toml::from_str(document).map_err(|e| Error::ConfigError {
            message: format!("Failed to parse TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error as described in [`from_toml_str`](Self::from_toml_str).
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
        Self::from_toml_str(&document)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if:
    /// - The root directory path is empty
    /// - The source extension is empty or contains a path separator or dot
    /// - The cache capacity is zero
    /// - The recent window is negative
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(config_error("Root directory path cannot be empty"));
        }

        if self.source_extension.is_empty() {
            return Err(config_error("Source extension cannot be empty"));
        }

        if self
            .source_extension
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '.')
        {
            return Err(config_error(
                "Source extension cannot contain '.' or path separators",
            ));
        }

        if self.source_extension.eq_ignore_ascii_case("json") {
            return Err(config_error(
                "Source extension 'json' is reserved for catalog rows",
            ));
        }

        if self.state_cache_capacity == 0 {
            return Err(config_error("State cache capacity must be greater than zero"));
        }

        if self.recent_window_days < 0 {
            return Err(config_error("Recent window cannot be negative"));
        }

        Ok(())
    }
}

fn config_error(message: &str) -> Error {
    Error::ConfigError {
        message: message.to_string(),
    }
}

/// Builder for [`PersistenceConfig`].
#[derive(Debug)]
pub struct PersistenceConfigBuilder {
    config: PersistenceConfig,
}

impl PersistenceConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PersistenceConfig::default(),
        }
    }

    /// Sets the root directory.
    #[must_use]
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Sets the snapshot content file extension.
    #[must_use]
    pub fn source_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.source_extension = extension.into();
        self
    }

    /// Sets the state cache capacity.
    #[must_use]
    pub const fn state_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.state_cache_capacity = capacity;
        self
    }

    /// Sets the recent window used by history statistics.
    #[must_use]
    pub const fn recent_window_days(mut self, days: i64) -> Self {
        self.config.recent_window_days = days;
        self
    }

    /// Sets the default retention count.
    #[must_use]
    pub const fn default_keep_count(mut self, count: usize) -> Self {
        self.config.default_keep_count = count;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> PersistenceConfig {
        self.config
    }
}

impl Default for PersistenceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
