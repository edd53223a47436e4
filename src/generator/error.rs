//! Error types for row generators

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::DownloadError;

/// Errors raised while constructing a generator or pulling raw rows from it
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// No strategy handles the target's format or protocol
    #[error("No row generator for '{url}' (format '{format}')")]
    NoStrategy { url: String, format: String },

    /// Fixed-width target whose schema does not declare every column width
    #[error("Fixed-width source '{url}' needs a width on every schema column")]
    MissingWidths { url: String },

    /// Program target that is not a local file
    #[error("Program '{url}' must be a local file")]
    ProgramNotLocal { url: String },

    /// Program exited unsuccessfully
    #[error("Program {program} failed with {status}: {stderr}")]
    ProgramFailed {
        program: PathBuf,
        status: String,
        stderr: String,
    },

    /// Archive does not contain the requested member
    #[error("Archive {archive} has no member '{member}'")]
    ArchiveMember { archive: PathBuf, member: String },

    /// Workbook does not contain the requested sheet
    #[error("Workbook '{url}' has no sheet '{sheet}'")]
    Sheet { url: String, sheet: String },

    /// Malformed workbook XML
    #[error("Invalid workbook part {part}: {error}")]
    Xml { part: String, error: String },

    /// Unknown character encoding label
    #[error("Unknown encoding '{0}'")]
    Encoding(String),

    /// A nested package or its resource could not be opened or read
    #[error("Nested resource '{url}' failed: {reason}")]
    Nested { url: String, reason: String },

    /// Target could not be fetched into the cache
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// IO error while reading a target
    #[error("IO error at {path}: {error}")]
    Io { path: PathBuf, error: String },

    /// Delimited text error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Archive error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl GeneratorError {
    pub(crate) fn io(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        GeneratorError::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Check whether this error happened before any source was opened
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            GeneratorError::NoStrategy { .. }
                | GeneratorError::MissingWidths { .. }
                | GeneratorError::ProgramNotLocal { .. }
        )
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            GeneratorError::NoStrategy { format, .. } if format == "ipynb" => format!(
                "{self}\n\nHint: Notebooks are not executed; export their output to a CSV file and reference that."
            ),
            GeneratorError::NoStrategy { .. } => format!(
                "{self}\n\nHint: Supported formats are csv, tsv, txt, xlsx and fixed; add '#&format=csv' to override."
            ),
            GeneratorError::MissingWidths { .. } => format!(
                "{self}\n\nHint: Add a 'width' property to each Table.Column term."
            ),
            GeneratorError::ProgramFailed { .. } => format!(
                "{self}\n\nHint: Run the program by hand with the resource environment to see its output."
            ),
            GeneratorError::Download(DownloadError::Unsupported { .. }) => format!(
                "{self}\n\nHint: Build with the 'http' feature to fetch remote targets."
            ),
            _ => self.to_string(),
        }
    }
}
