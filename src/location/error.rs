//! Error types for URL parsing and resolution

use thiserror::Error;

/// Errors raised while turning a raw reference into a fetchable URL
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UrlError {
    /// Empty reference
    #[error("Empty URL reference")]
    Empty,

    /// Reference could not be parsed
    #[error("Invalid URL '{url}': {reason}")]
    Parse { url: String, reason: String },

    /// The package base is neither an archive, a spreadsheet, a tabular file nor a
    /// directory holding the canonical metadata file
    #[error("Cannot resolve '{reference}' against package '{package}': metadata file is not named '{expected}'")]
    NonStandardMetadata {
        package: String,
        reference: String,
        expected: String,
    },

    /// A nested package or its resource could not be located
    #[error("Nested package lookup failed for '{url}': {reason}")]
    NestedLookup { url: String, reason: String },

    /// A chain of nested packages exceeded the configured depth
    #[error("Nested package chain too deep at '{url}': {depth} > {max}")]
    NestingTooDeep { url: String, depth: usize, max: usize },
}

impl UrlError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            UrlError::NonStandardMetadata { package, expected, .. } => format!(
                "{self}\n\nHint: Rename the metadata file of '{package}' to '{expected}' or set a package URL on the document."
            ),
            UrlError::NestingTooDeep { .. } => format!(
                "{self}\n\nHint: Check for packages that reference each other in a cycle."
            ),
            _ => self.to_string(),
        }
    }
}
