//! Error types for term documents

use std::path::PathBuf;

use thiserror::Error;

use crate::location::UrlError;
use crate::storage::DownloadError;

/// Errors raised while loading or querying a term document
#[derive(Error, Debug)]
pub enum DocumentError {
    /// IO error
    #[error("Failed to read {path}: {error}")]
    Io { path: PathBuf, error: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Document does not have the section/term shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Property value is neither a scalar nor a list of scalars
    #[error("Property '{property}' of {term} must be a scalar or a list of scalars")]
    InvalidProperty { term: String, property: String },

    /// Metadata file could not be read out of an archive package
    #[error("Cannot read metadata from archive '{url}': {reason}")]
    Archive { url: String, reason: String },

    /// Document location could not be resolved
    #[error(transparent)]
    Url(#[from] UrlError),

    /// Metadata could not be fetched
    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl DocumentError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            DocumentError::InvalidDocument(_) => format!(
                "{self}\n\nHint: A document maps section names to lists of terms, each with a 'term' key."
            ),
            DocumentError::Url(e) => e.user_message(),
            _ => self.to_string(),
        }
    }
}
