//! Package distributions

use std::fmt;

use crate::document::{Document, Term};
use crate::location::{AppUrl, PackageType, PackageUrl, UrlError};

/// A `Root.Distribution` term: one location a package is published at
#[derive(Clone)]
pub struct Distribution {
    document: Document,
    term: Term,
}

impl Distribution {
    pub fn new(document: Document, term: Term) -> Self {
        Self { document, term }
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    pub fn url(&self) -> Option<&str> {
        self.term.value().filter(|v| !v.trim().is_empty())
    }

    pub fn package_url(&self) -> Result<PackageUrl, UrlError> {
        let url = self.url().ok_or(UrlError::Empty)?;
        PackageUrl::parse(url, &self.document.config().metadata_file_name)
    }

    /// Location of the package's metadata file
    pub fn metadata_url(&self) -> Result<AppUrl, UrlError> {
        Ok(self.package_url()?.metadata_url())
    }

    /// Container format, inferred from the URL alone
    ///
    /// A missing or unparseable URL is [`PackageType::Unknown`].
    pub fn package_type(&self) -> PackageType {
        self.package_url()
            .map(|p| p.package_type())
            .unwrap_or(PackageType::Unknown)
    }
}

impl fmt::Debug for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distribution")
            .field("url", &self.url())
            .field("package_type", &self.package_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackageConfig;

    fn distribution(url: &str) -> Distribution {
        Distribution::new(
            Document::new(PackageConfig::default()),
            Term::new("Distribution", url),
        )
    }

    #[test]
    fn test_package_types() {
        let cases = [
            ("http://example.com/pkg.xlsx", PackageType::Spreadsheet),
            ("http://example.com/pkg.zip", PackageType::Archive),
            ("http://example.com/pkg/metadata.yaml", PackageType::Filesystem),
            ("http://example.com/pkg/", PackageType::Filesystem),
            ("http://example.com/pkg.csv", PackageType::Tabular),
            ("http://example.com/pkg.json", PackageType::Unknown),
        ];
        for (url, expected) in cases {
            assert_eq!(distribution(url).package_type(), expected, "{url}");
        }
        assert_eq!(distribution("").package_type(), PackageType::Unknown);
    }

    #[test]
    fn test_metadata_url() {
        let d = distribution("http://example.com/pkg/");
        assert_eq!(
            d.metadata_url().unwrap().to_string(),
            "http://example.com/pkg/metadata.yaml"
        );
        assert_eq!(d.package_type().as_str(), "fs");
    }
}
