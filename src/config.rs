//! Configuration for package resolution and row streaming

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical name of a filesystem package's metadata file
pub const DEFAULT_METADATA_FILE_NAME: &str = "metadata.yaml";

/// Errors raised while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("Failed to read configuration {path}: {error}")]
    Io { path: PathBuf, error: String },

    /// TOML parsing error
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration shared by every document, resource and generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageConfig {
    /// Root of the download cache (shared read-mostly by all resources of a document)
    pub cache_dir: PathBuf,

    /// File name that marks a directory as a filesystem package
    pub metadata_file_name: String,

    /// Maximum chain length when a package references a resource of another package
    pub max_nesting_depth: usize,

    /// Encoding used when neither the target nor the resource declares one
    pub default_encoding: String,

    /// Cache sub-directory that holds per-resource compiled transform plans
    pub code_dir_name: String,

    /// First data line when a resource has no `startline` property
    pub default_start_line: usize,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("data-package-cache"),
            metadata_file_name: DEFAULT_METADATA_FILE_NAME.to_string(),
            max_nesting_depth: 8,
            default_encoding: "utf-8".to_string(),
            code_dir_name: "resource-code".to_string(),
            default_start_line: 1,
        }
    }
}

impl PackageConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> PackageConfigBuilder {
        PackageConfigBuilder::default()
    }

    /// Parse a configuration from TOML text; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }
}

/// Builder for PackageConfig
#[derive(Debug, Default)]
pub struct PackageConfigBuilder {
    config: PackageConfig,
}

impl PackageConfigBuilder {
    /// Set the download cache root
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Set the canonical metadata file name
    pub fn metadata_file_name(mut self, name: &str) -> Self {
        self.config.metadata_file_name = name.to_string();
        self
    }

    /// Set the maximum nested-package chain length (at least 1)
    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.config.max_nesting_depth = depth.max(1);
        self
    }

    /// Set the fallback character encoding
    pub fn default_encoding(mut self, encoding: &str) -> Self {
        self.config.default_encoding = encoding.to_string();
        self
    }

    /// Set the cache sub-directory for compiled transform plans
    pub fn code_dir_name(mut self, name: &str) -> Self {
        self.config.code_dir_name = name.to_string();
        self
    }

    /// Set the default first data line
    pub fn default_start_line(mut self, line: usize) -> Self {
        self.config.default_start_line = line;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PackageConfig {
        self.config
    }
}
