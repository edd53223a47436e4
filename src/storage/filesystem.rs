//! File system download cache
//!
//! ## Security
//!
//! Sub-paths handed to [`Downloader::make_dirs`] may not contain ".." and always
//! stay below the cache root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{DownloadError, Downloader};
use crate::location::AppUrl;

/// Cache that keeps downloads below a root directory
///
/// Remote targets are stored at `downloads/<sha256 of url>/<file name>`.
#[derive(Debug, Clone)]
pub struct FileSystemCache {
    root: PathBuf,
}

impl FileSystemCache {
    /// Create a cache rooted at `root`; the directory is created lazily
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn sub_path(&self, path: &str) -> Result<PathBuf, DownloadError> {
        let normalized = path.trim_start_matches('/');
        let relative = Path::new(normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DownloadError::InvalidPath(format!(
                "'{}' escapes the cache root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Cache location for a remote URL
    pub fn download_path(&self, url: &AppUrl) -> PathBuf {
        let resource = url.without_fragment().to_string();
        let key = format!("{:x}", Sha256::digest(resource.as_bytes()));
        let file_name = url.resource_file().unwrap_or("download");
        self.root.join("downloads").join(key).join(file_name)
    }

    fn fetch(&self, url: &AppUrl, destination: &Path) -> Result<(), DownloadError> {
        let parent = destination
            .parent()
            .ok_or_else(|| DownloadError::InvalidPath(destination.display().to_string()))?;
        create_dir(parent)?;

        let bytes = fetch_bytes(&url.without_fragment().to_string())?;

        // Write to a sibling and rename so readers never see a partial file
        let partial = destination.with_extension("partial");
        fs::write(&partial, &bytes).map_err(|e| io_error(&partial, e))?;
        fs::rename(&partial, destination).map_err(|e| io_error(destination, e))?;
        info!("Downloaded {} ({} bytes)", url, bytes.len());
        Ok(())
    }
}

impl Downloader for FileSystemCache {
    fn cache_root(&self) -> &Path {
        &self.root
    }

    fn make_dirs(&self, sub_path: &str) -> Result<PathBuf, DownloadError> {
        let dir = self.sub_path(sub_path)?;
        create_dir(&dir)?;
        Ok(dir)
    }

    fn resolve(&self, url: &AppUrl) -> Result<PathBuf, DownloadError> {
        if let Some(path) = url.to_file_path() {
            return Ok(path);
        }

        let destination = self.download_path(url);
        if destination.is_file() {
            debug!("Cache hit for {}", url);
            return Ok(destination);
        }
        self.fetch(url, &destination)?;
        Ok(destination)
    }
}

fn create_dir(dir: &Path) -> Result<(), DownloadError> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(io_error(dir, e)),
    }
}

fn io_error(path: &Path, error: std::io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

#[cfg(feature = "http")]
fn fetch_bytes(url: &str) -> Result<Vec<u8>, DownloadError> {
    use std::time::Duration;

    let http_error = |reason: String| DownloadError::Http {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| http_error(format!("Failed to create HTTP client: {}", e)))?;

    let response = client.get(url).send().map_err(|e| http_error(e.to_string()))?;

    if !response.status().is_success() {
        return Err(http_error(format!("HTTP error {}", response.status())));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| http_error(e.to_string()))
}

#[cfg(not(feature = "http"))]
fn fetch_bytes(url: &str) -> Result<Vec<u8>, DownloadError> {
    Err(DownloadError::Unsupported {
        url: url.to_string(),
    })
}
