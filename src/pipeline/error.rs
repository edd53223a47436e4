//! Error types for casting and transforms

use std::path::PathBuf;

use thiserror::Error;

/// A single field that could not be coerced to its declared type
///
/// Never raised out of a row stream; recorded in the stream's error map instead.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot cast '{value}' to {target}")]
pub struct CastError {
    pub value: String,
    pub target: String,
}

/// Errors raised while compiling transform expressions
#[derive(Error, Debug)]
pub enum TransformError {
    /// Expression could not be parsed
    #[error("Invalid transform '{expression}': {reason}")]
    Parse { expression: String, reason: String },

    /// Expression names a function the library does not provide
    #[error("Unknown transform function '{name}' in '{expression}'")]
    UnknownFunction { name: String, expression: String },

    /// Compiled plan could not be written to the resource's code path
    #[error("Failed to write transform plan {path}: {error}")]
    Plan { path: PathBuf, error: String },
}

impl TransformError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            TransformError::UnknownFunction { name, .. } => format!(
                "{self}\n\nHint: Register '{name}' on the document's transform library or use a built-in function."
            ),
            TransformError::Parse { .. } => format!(
                "{self}\n\nHint: Transforms look like 'strip | replace(\",\", \"\") | int'."
            ),
            _ => self.to_string(),
        }
    }
}
