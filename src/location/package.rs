//! Package base URLs and container classification

use std::fmt;

use serde::{Deserialize, Serialize};

use super::app_url::AppUrl;
use super::error::UrlError;

/// Container format of a data package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageType {
    /// A spreadsheet whose sheets are the resources
    #[serde(rename = "xlsx")]
    Spreadsheet,
    /// A zip archive holding the metadata file and resource files
    #[serde(rename = "zip")]
    Archive,
    /// A directory holding the canonical metadata file
    #[serde(rename = "fs")]
    Filesystem,
    /// A single tabular file
    #[serde(rename = "csv")]
    Tabular,
    #[serde(rename = "unk")]
    Unknown,
}

impl PackageType {
    /// Classify a package location from the shape of its URL alone
    ///
    /// The checks run in a fixed priority order; the first match wins.
    pub fn classify(url: &AppUrl, metadata_file_name: &str) -> Self {
        if url.target_format().as_deref() == Some("xlsx") {
            PackageType::Spreadsheet
        } else if url.is_archive() {
            PackageType::Archive
        } else if metadata_url(url, metadata_file_name).target_file() == Some(metadata_file_name) {
            PackageType::Filesystem
        } else if url.target_format().as_deref() == Some("csv") {
            PackageType::Tabular
        } else {
            PackageType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Spreadsheet => "xlsx",
            PackageType::Archive => "zip",
            PackageType::Filesystem => "fs",
            PackageType::Tabular => "csv",
            PackageType::Unknown => "unk",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// URL of a package's metadata file
///
/// Directory-like locations (trailing slash or no extension) get the canonical
/// metadata file name appended; anything else already names the file.
pub fn metadata_url(url: &AppUrl, metadata_file_name: &str) -> AppUrl {
    let directory_like = url.path().ends_with('/') || url.resource_format().is_none();
    if directory_like && !url.is_archive() {
        // join_dir only fails on unparsable references; the file name is a plain segment
        url.without_fragment()
            .join_dir(metadata_file_name)
            .unwrap_or_else(|_| url.clone())
    } else {
        url.clone()
    }
}

/// The base location that relative resource references resolve against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUrl {
    url: AppUrl,
    metadata_file_name: String,
}

impl PackageUrl {
    pub fn new(url: AppUrl, metadata_file_name: &str) -> Self {
        Self {
            url,
            metadata_file_name: metadata_file_name.to_string(),
        }
    }

    pub fn parse(raw: &str, metadata_file_name: &str) -> Result<Self, UrlError> {
        Ok(Self::new(AppUrl::parse(raw)?, metadata_file_name))
    }

    pub fn url(&self) -> &AppUrl {
        &self.url
    }

    pub fn package_type(&self) -> PackageType {
        PackageType::classify(&self.url, &self.metadata_file_name)
    }

    pub fn metadata_url(&self) -> AppUrl {
        metadata_url(&self.url, &self.metadata_file_name)
    }

    /// Resolve a resource reference against this package
    ///
    /// Absolute references come back unchanged, which keeps resolution idempotent.
    /// Archive packages address their files as fragments of the archive URL,
    /// spreadsheet packages address sheets, filesystem packages join against the
    /// metadata file's directory.
    pub fn resolve_url(&self, reference: &str) -> Result<AppUrl, UrlError> {
        let parsed = AppUrl::parse(reference)?;
        if parsed.is_absolute() {
            return Ok(parsed);
        }

        match self.package_type() {
            PackageType::Archive => {
                let mut target = self.url.without_fragment();
                let member = match parsed.target_segment() {
                    Some(segment) => format!("{};{}", parsed.path(), segment),
                    None => parsed.path().to_string(),
                };
                target.set_fragment(Some(&member));
                for (key, value) in parsed.fragment_args() {
                    target.set_fragment_arg(key, value);
                }
                Ok(target)
            }
            PackageType::Spreadsheet => {
                let mut target = self.url.without_fragment();
                target.set_fragment(Some(parsed.path()));
                Ok(target)
            }
            PackageType::Filesystem => self.metadata_url().join(reference),
            PackageType::Tabular => {
                let mut target = self.url.without_fragment();
                target.set_fragment(parsed.fragment());
                Ok(target)
            }
            PackageType::Unknown => Err(UrlError::NonStandardMetadata {
                package: self.url.to_string(),
                reference: reference.to_string(),
                expected: self.metadata_file_name.clone(),
            }),
        }
    }

    /// Resolve a reference against the package's directory rather than its base file
    pub fn join_dir(&self, reference: &str) -> Result<AppUrl, UrlError> {
        self.metadata_url().join(reference)
    }
}

impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
