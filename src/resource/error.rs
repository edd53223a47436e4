//! Error types for resource streaming

use thiserror::Error;

use crate::document::DocumentError;
use crate::generator::GeneratorError;
use crate::location::UrlError;
use crate::pipeline::TransformError;
use crate::storage::DownloadError;

/// Errors raised by resources and their row streams
///
/// Per-field casting failures are not errors here; they are collected in the resource's
/// error map while streaming.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The reference could not be resolved
    #[error(transparent)]
    Url(#[from] UrlError),

    /// No row source for the target, or the source failed while reading
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    /// A column transform could not be compiled
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The resource has no name to look its schema up by
    #[error("Resource for url '{url}' does not have a name")]
    MissingName { url: String },

    /// The resource term has no value
    #[error("Resource '{name}' does not have a url")]
    MissingUrl { name: String },
}

impl ResourceError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ResourceError::Url(e) => e.user_message(),
            ResourceError::Generator(e) => e.user_message(),
            ResourceError::Document(e) => e.user_message(),
            ResourceError::Transform(e) => e.user_message(),
            ResourceError::MissingName { .. } => format!(
                "{self}\n\nHint: Add a 'name' property to the resource term; schemas are looked up by it."
            ),
            _ => self.to_string(),
        }
    }
}
