//! Structured application URLs
//!
//! An [`AppUrl`] extends an ordinary URL with two pieces of information that
//! resources need:
//!
//! - a **scheme extension** naming the protocol that produces rows
//!   (`program+file:bin/gen.sh`, `metapack+http://example.com/pkg/#people`)
//! - a **fragment** selecting a target inside a container (`pkg.zip#data/people.csv`,
//!   `book.xlsx#Sheet1`, `pkg.zip#data/book.xlsx;Sheet1`) plus `&key=value` arguments
//!   such as `encoding` and `format`
//!
//! Local paths are kept as plain strings and normalised lexically; everything with a
//! network scheme is parsed with the `url` crate.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::error::UrlError;

static SCHEME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9.\-]+)(?:\+([A-Za-z][A-Za-z0-9.\-]+))?:").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(String),
    Web(Url),
}

/// A parsed reference URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppUrl {
    scheme_extension: Option<String>,
    location: Location,
    fragment: Option<String>,
    fragment_args: BTreeMap<String, String>,
}

impl AppUrl {
    /// Parse a raw reference
    ///
    /// References without a scheme are local file paths, relative or absolute.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UrlError::Empty);
        }

        let (base, fragment) = match raw.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment)),
            None => (raw, None),
        };
        let (fragment, fragment_args) = parse_fragment(fragment);

        let (scheme_extension, scheme, rest) = match SCHEME_REGEX.captures(base) {
            Some(caps) => {
                let end = caps.get(0).map_or(0, |m| m.end());
                let first = caps[1].to_lowercase();
                match caps.get(2) {
                    Some(second) => (Some(first), second.as_str().to_lowercase(), &base[end..]),
                    None => (None, first, &base[end..]),
                }
            }
            None => (None, "file".to_string(), base),
        };

        let location = if scheme == "file" {
            Location::File(normalize_path(strip_authority(rest)))
        } else {
            let url = Url::parse(&format!("{}:{}", scheme, rest)).map_err(|e| UrlError::Parse {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;
            Location::Web(url)
        };

        Ok(Self {
            scheme_extension,
            location,
            fragment,
            fragment_args,
        })
    }

    /// Build a local file URL from a filesystem path
    pub fn from_path(path: &Path) -> Self {
        Self {
            scheme_extension: None,
            location: Location::File(normalize_path(&path.to_string_lossy())),
            fragment: None,
            fragment_args: BTreeMap::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        match &self.location {
            Location::File(_) => "file",
            Location::Web(url) => url.scheme(),
        }
    }

    pub fn scheme_extension(&self) -> Option<&str> {
        self.scheme_extension.as_deref()
    }

    /// The protocol that produces rows: the scheme extension if present, else the scheme
    pub fn proto(&self) -> &str {
        self.scheme_extension().unwrap_or_else(|| self.scheme())
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, Location::Web(_))
    }

    pub fn is_absolute(&self) -> bool {
        match &self.location {
            Location::File(path) => path.starts_with('/'),
            Location::Web(_) => true,
        }
    }

    pub fn path(&self) -> &str {
        match &self.location {
            Location::File(path) => path,
            Location::Web(url) => url.path(),
        }
    }

    /// Target part of the fragment, without `&key=value` arguments
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn fragment_args(&self) -> &BTreeMap<String, String> {
        &self.fragment_args
    }

    pub fn fragment_arg(&self, key: &str) -> Option<&str> {
        self.fragment_args.get(key).map(String::as_str)
    }

    /// Last path segment
    pub fn resource_file(&self) -> Option<&str> {
        self.path()
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
    }

    /// Lowercase extension of the resource file
    pub fn resource_format(&self) -> Option<String> {
        self.resource_file().and_then(extension_of)
    }

    pub fn is_archive(&self) -> bool {
        self.resource_format().as_deref() == Some("zip")
    }

    /// Archive member named by the fragment
    pub fn target_member(&self) -> Option<&str> {
        self.split_fragment().0
    }

    /// Sheet or segment named by the fragment
    pub fn target_segment(&self) -> Option<&str> {
        self.split_fragment().1
    }

    /// File that holds the rows: the archive member, else the resource file
    pub fn target_file(&self) -> Option<&str> {
        if self.is_archive() {
            self.target_member()
        } else {
            self.resource_file()
        }
    }

    /// Format of the target: an explicit `format` argument wins over the extension
    pub fn target_format(&self) -> Option<String> {
        if let Some(format) = self.fragment_arg("format") {
            return Some(format.to_lowercase());
        }
        self.target_file().and_then(extension_of)
    }

    pub fn encoding(&self) -> Option<&str> {
        self.fragment_arg("encoding")
    }

    pub fn to_file_path(&self) -> Option<PathBuf> {
        match &self.location {
            Location::File(path) => Some(PathBuf::from(path)),
            Location::Web(_) => None,
        }
    }

    pub fn set_scheme_extension(&mut self, extension: Option<&str>) {
        self.scheme_extension = extension.map(str::to_lowercase);
    }

    pub fn set_fragment(&mut self, fragment: Option<&str>) {
        self.fragment = fragment.filter(|f| !f.is_empty()).map(str::to_string);
    }

    pub fn set_fragment_arg(&mut self, key: &str, value: &str) {
        self.fragment_args.insert(key.to_lowercase(), value.to_string());
    }

    pub fn with_scheme_extension(mut self, extension: Option<&str>) -> Self {
        self.set_scheme_extension(extension);
        self
    }

    pub fn with_fragment(mut self, fragment: Option<&str>) -> Self {
        self.set_fragment(fragment);
        self
    }

    /// Copy of this URL with no fragment and no scheme extension
    pub fn without_fragment(&self) -> Self {
        Self {
            scheme_extension: None,
            location: self.location.clone(),
            fragment: None,
            fragment_args: BTreeMap::new(),
        }
    }

    /// Resolve `reference` against the directory containing this URL
    ///
    /// Absolute references are returned unchanged. The reference keeps its own
    /// scheme extension and fragment.
    pub fn join(&self, reference: &str) -> Result<Self, UrlError> {
        let reference = AppUrl::parse(reference)?;
        if reference.is_absolute() {
            return Ok(reference);
        }

        let location = match &self.location {
            Location::File(base) => {
                let dir = match base.rfind('/') {
                    Some(i) => &base[..=i],
                    None => "",
                };
                Location::File(normalize_path(&format!("{}{}", dir, reference.path())))
            }
            Location::Web(url) => {
                Location::Web(url.join(reference.path()).map_err(|e| UrlError::Parse {
                    url: reference.to_string(),
                    reason: e.to_string(),
                })?)
            }
        };

        Ok(Self {
            scheme_extension: reference.scheme_extension,
            location,
            fragment: reference.fragment,
            fragment_args: reference.fragment_args,
        })
    }

    /// Resolve `reference` treating this URL itself as a directory
    pub fn join_dir(&self, reference: &str) -> Result<Self, UrlError> {
        self.as_directory().join(reference)
    }

    fn as_directory(&self) -> Self {
        let location = match &self.location {
            Location::File(path) if path.ends_with('/') => Location::File(path.clone()),
            Location::File(path) => Location::File(format!("{}/", path)),
            Location::Web(url) => {
                let mut url = url.clone();
                if !url.path().ends_with('/') {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
                Location::Web(url)
            }
        };
        Self {
            location,
            ..self.clone()
        }
    }

    fn split_fragment(&self) -> (Option<&str>, Option<&str>) {
        let Some(fragment) = self.fragment() else {
            return (None, None);
        };
        match (self.is_archive(), fragment.split_once(';')) {
            (true, Some((member, segment))) => (
                Some(member).filter(|s| !s.is_empty()),
                Some(segment).filter(|s| !s.is_empty()),
            ),
            (true, None) => (Some(fragment), None),
            (false, Some((_, segment))) => (None, Some(segment).filter(|s| !s.is_empty())),
            (false, None) => (None, Some(fragment)),
        }
    }
}

impl FromStr for AppUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppUrl::parse(s)
    }
}

impl fmt::Display for AppUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(extension) = &self.scheme_extension {
            write!(f, "{}+", extension)?;
        }
        match &self.location {
            Location::File(path) if path.starts_with('/') => write!(f, "file://{}", path)?,
            Location::File(path) if self.scheme_extension.is_some() => write!(f, "file:{}", path)?,
            Location::File(path) => write!(f, "{}", path)?,
            Location::Web(url) => write!(f, "{}", url)?,
        }
        if self.fragment.is_some() || !self.fragment_args.is_empty() {
            write!(f, "#{}", self.fragment.as_deref().unwrap_or(""))?;
            for (key, value) in &self.fragment_args {
                write!(f, "&{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

fn parse_fragment(fragment: Option<&str>) -> (Option<String>, BTreeMap<String, String>) {
    let Some(fragment) = fragment else {
        return (None, BTreeMap::new());
    };
    let mut parts = fragment.split('&');
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let args = parts
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect();
    (target, args)
}

fn strip_authority(rest: &str) -> &str {
    match rest.strip_prefix("//") {
        Some(after) if after.starts_with('/') => after,
        Some(after) => match after.find('/') {
            Some(i) => &after[i..],
            None => "/",
        },
        None => rest,
    }
}

/// Collapse `.` and `..` segments and duplicate separators
pub(crate) fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&last) if last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if trailing && !parts.is_empty() {
        out.push('/');
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}

pub(crate) fn extension_of(file: &str) -> Option<String> {
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relative_path() {
        let u = AppUrl::parse("./data/../data/people.csv").unwrap();
        assert_eq!(u.scheme(), "file");
        assert_eq!(u.path(), "data/people.csv");
        assert_eq!(u.resource_format().as_deref(), Some("csv"));
        assert!(!u.is_absolute());
        assert_eq!(u.to_string(), "data/people.csv");
    }

    #[test]
    fn test_parse_scheme_extension() {
        let u = AppUrl::parse("program+file:bin/generate.sh").unwrap();
        assert_eq!(u.scheme_extension(), Some("program"));
        assert_eq!(u.proto(), "program");
        assert_eq!(u.path(), "bin/generate.sh");
        assert_eq!(u.to_string(), "program+file:bin/generate.sh");

        let u = AppUrl::parse("metapack+http://example.com/pkg/#people").unwrap();
        assert_eq!(u.scheme(), "http");
        assert_eq!(u.proto(), "metapack");
        assert_eq!(u.fragment(), Some("people"));
    }

    #[test]
    fn test_parse_absolute_file_url() {
        let u = AppUrl::parse("file:///srv/pkg/metadata.yaml").unwrap();
        assert_eq!(u.path(), "/srv/pkg/metadata.yaml");
        assert!(u.is_absolute());
        assert_eq!(u.to_string(), "file:///srv/pkg/metadata.yaml");

        let u = AppUrl::parse("/srv/pkg/data.csv").unwrap();
        assert_eq!(u.to_string(), "file:///srv/pkg/data.csv");
    }

    #[test]
    fn test_archive_fragment() {
        let u = AppUrl::parse("file:///srv/pkg.zip#data/book.xlsx;Sheet1&encoding=latin1").unwrap();
        assert!(u.is_archive());
        assert_eq!(u.target_member(), Some("data/book.xlsx"));
        assert_eq!(u.target_file(), Some("data/book.xlsx"));
        assert_eq!(u.target_segment(), Some("Sheet1"));
        assert_eq!(u.target_format().as_deref(), Some("xlsx"));
        assert_eq!(u.encoding(), Some("latin1"));
    }

    #[test]
    fn test_spreadsheet_fragment_is_segment() {
        let u = AppUrl::parse("book.xlsx#Totals").unwrap();
        assert_eq!(u.target_file(), Some("book.xlsx"));
        assert_eq!(u.target_segment(), Some("Totals"));
        assert_eq!(u.target_format().as_deref(), Some("xlsx"));
    }

    #[test]
    fn test_format_argument_overrides_extension() {
        let u = AppUrl::parse("data/people.txt#&format=csv").unwrap();
        assert_eq!(u.fragment(), None);
        assert_eq!(u.target_format().as_deref(), Some("csv"));
        assert_eq!(u.to_string(), "data/people.txt#&format=csv");
    }

    #[test]
    fn test_display_round_trip() {
        for raw in [
            "data/people.csv",
            "program+file:bin/gen.sh#&encoding=utf-8",
            "file:///srv/pkg.zip#data/a.csv",
            "https://example.com/data/a.csv#x;y",
            "metapack+file:///srv/other/metadata.yaml#people",
        ] {
            let u = AppUrl::parse(raw).unwrap();
            assert_eq!(AppUrl::parse(&u.to_string()).unwrap(), u, "{}", raw);
        }
    }

    #[test]
    fn test_join() {
        let base = AppUrl::parse("file:///srv/pkg/metadata.yaml").unwrap();
        let joined = base.join("data/../data/people.csv#x").unwrap();
        assert_eq!(joined.to_string(), "file:///srv/pkg/data/people.csv#x");

        let web = AppUrl::parse("http://example.com/pkg/metadata.yaml").unwrap();
        assert_eq!(
            web.join("data/a.csv").unwrap().to_string(),
            "http://example.com/pkg/data/a.csv"
        );

        let absolute = base.join("http://other.org/x.csv").unwrap();
        assert_eq!(absolute.to_string(), "http://other.org/x.csv");
    }

    #[test]
    fn test_join_dir() {
        let dir = AppUrl::parse("file:///srv/pkg").unwrap();
        assert_eq!(
            dir.join_dir("notebooks/make.ipynb").unwrap().path(),
            "/srv/pkg/notebooks/make.ipynb"
        );
    }

    #[test]
    fn test_invalid_urls() {
        assert_eq!(AppUrl::parse("   "), Err(UrlError::Empty));
        assert!(matches!(
            AppUrl::parse("http://[bad"),
            Err(UrlError::Parse { .. })
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/./b/../c/"), "/a/c/");
        assert_eq!(normalize_path("../x"), "../x");
        assert_eq!(normalize_path("/../x"), "/x");
        assert_eq!(normalize_path("./"), ".");
    }
}
