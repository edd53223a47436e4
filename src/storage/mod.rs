//! Download cache abstraction
//!
//! Defines the Downloader trait that documents use to reach their targets, and the
//! FileSystemCache implementation. A document's cache is shared read-mostly by all
//! of its resources; any locking a shared download needs is the cache's concern.

use std::path::{Path, PathBuf};

use crate::location::AppUrl;

pub mod filesystem;

pub use filesystem::FileSystemCache;

/// Error type for cache operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("IO error at {path}: {error}")]
    Io { path: PathBuf, error: String },
    #[error("Failed to fetch {url}: {reason}")]
    Http { url: String, reason: String },
    #[error("Cannot fetch {url}: remote downloads require the 'http' feature")]
    Unsupported { url: String },
    #[error("Invalid cache path: {0}")]
    InvalidPath(String),
}

/// Trait for download caches
pub trait Downloader: Send + Sync {
    /// Root directory of the cache
    fn cache_root(&self) -> &Path;

    /// Create a directory below the cache root; an existing directory is success
    fn make_dirs(&self, sub_path: &str) -> Result<PathBuf, DownloadError>;

    /// Turn a URL into a local file, downloading remote targets into the cache
    ///
    /// Only the resource part of the URL is fetched; fragments select inside it.
    fn resolve(&self, url: &AppUrl) -> Result<PathBuf, DownloadError>;
}
