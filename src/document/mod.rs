//! Term documents
//!
//! A document is an ordered list of sections, each holding terms. Documents are written
//! in YAML, mapping section names to term lists:
//!
//! ```yaml
//! Root:
//!   - term: Name
//!     value: example.com-people
//! Resources:
//!   - term: Datafile
//!     value: data/people.csv
//!     name: people
//! Schema:
//!   - term: Table
//!     value: people
//!     children:
//!       - term: Column
//!         value: id
//!         datatype: integer
//! ```
//!
//! Unqualified term types are placed under `Root`, or under the parent's record type
//! for children (`Column` inside `Table` becomes `Table.Column`).
//!
//! [`Document`] is cheap to clone; clones share their sections until one is modified.

mod error;
mod term;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::PackageConfig;
use crate::generator::read_archive_member;
use crate::location::{
    AppUrl, NestedPackageResolver, PackageType, PackageUrl, UrlError, UrlResolver, metadata_url,
};
use crate::models::{Column, DataType, Table};
use crate::pipeline::{SharedErrors, TransformLibrary};
use crate::resource::{Distribution, Resource};
use crate::storage::{Downloader, FileSystemCache};

pub use error::DocumentError;
pub use term::{Term, TermKind};

use term::RawTerm;

static SLUG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lower-case, with runs of other characters collapsed to single dashes
pub fn slugify(text: &str) -> String {
    SLUG_REGEX
        .replace_all(&text.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// A named group of terms
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub name: String,
    pub terms: Vec<Term>,
}

impl Section {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            terms: Vec::new(),
        }
    }
}

/// A loaded metadata document and the context its resources resolve in
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

#[derive(Clone)]
struct DocumentInner {
    location: Option<AppUrl>,
    package_url: Option<PackageUrl>,
    sections: Vec<Section>,
    env: BTreeMap<String, String>,
    config: PackageConfig,
    downloader: Arc<dyn Downloader>,
    transforms: Arc<TransformLibrary>,
    depth: usize,
    // Casting errors per resource term, kept across lookups
    errors: Arc<Mutex<HashMap<String, SharedErrors>>>,
}

impl Document {
    /// An empty document without a package location
    pub fn new(config: PackageConfig) -> Self {
        let downloader = Arc::new(FileSystemCache::new(&config.cache_dir));
        Self {
            inner: Arc::new(DocumentInner {
                location: None,
                package_url: None,
                sections: Vec::new(),
                env: BTreeMap::new(),
                config,
                downloader,
                transforms: Arc::new(TransformLibrary::new()),
                depth: 0,
                errors: Arc::default(),
            }),
        }
    }

    /// Parse a document from YAML text
    ///
    /// The document has no package location; relative resource references stay
    /// relative until one is set with [`Document::with_package_url`].
    pub fn from_yaml_str(content: &str, config: PackageConfig) -> Result<Self, DocumentError> {
        let mut document = Self::new(config);
        document.inner_mut().sections = parse_sections(content)?;
        Ok(document)
    }

    /// Open the document of a package
    ///
    /// `location` may be a package directory, a metadata file, or a zip archive; relative
    /// paths are taken from the current directory.
    pub fn open(location: &str, config: PackageConfig) -> Result<Self, DocumentError> {
        Self::open_url(&AppUrl::parse(location)?, config)
    }

    pub fn open_url(url: &AppUrl, config: PackageConfig) -> Result<Self, DocumentError> {
        let document = Self::new(config);
        document.load(url, 0)
    }

    /// Open another package with this document's configuration, cache and transforms
    ///
    /// The new document sits one level deeper in the nesting chain.
    pub fn open_nested(&self, url: &AppUrl) -> Result<Self, DocumentError> {
        self.load(url, self.inner.depth + 1)
    }

    fn load(&self, url: &AppUrl, depth: usize) -> Result<Self, DocumentError> {
        let max = self.inner.config.max_nesting_depth;
        if depth > max {
            return Err(UrlError::NestingTooDeep {
                url: url.to_string(),
                depth,
                max,
            }
            .into());
        }

        let url = absolute_from_cwd(url)?;
        let metadata_name = self.inner.config.metadata_file_name.clone();

        let (location, package_url, content) = if url.is_archive() {
            let member = url.target_member().unwrap_or(metadata_name.as_str()).to_string();
            let path = self.inner.downloader.resolve(&url)?;
            let bytes = read_archive_member(&path, Some(&member), None).map_err(|e| {
                DocumentError::Archive {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            let base = url.without_fragment();
            (
                base.clone().with_fragment(Some(&member)),
                PackageUrl::new(base, &metadata_name),
                String::from_utf8_lossy(&bytes).into_owned(),
            )
        } else {
            let metadata = metadata_url(&url.without_fragment(), &metadata_name);
            let path = self.inner.downloader.resolve(&metadata)?;
            let content = std::fs::read_to_string(&path).map_err(|e| DocumentError::Io {
                path: path.clone(),
                error: e.to_string(),
            })?;
            (
                metadata.clone(),
                PackageUrl::new(metadata, &metadata_name),
                content,
            )
        };

        let sections = parse_sections(&content)?;
        info!(document = %location, depth, "Loaded package document");

        let mut inner = (*self.inner).clone();
        inner.location = Some(location);
        inner.package_url = Some(package_url);
        inner.sections = sections;
        inner.depth = depth;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn inner_mut(&mut self) -> &mut DocumentInner {
        Arc::make_mut(&mut self.inner)
    }

    pub fn with_package_url(mut self, package_url: PackageUrl) -> Self {
        self.set_package_url(package_url);
        self
    }

    pub fn set_package_url(&mut self, package_url: PackageUrl) {
        self.inner_mut().package_url = Some(package_url);
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.inner_mut().downloader = downloader;
        self
    }

    pub fn with_transforms(mut self, transforms: TransformLibrary) -> Self {
        self.inner_mut().transforms = Arc::new(transforms);
        self
    }

    /// Set a variable exported to every resource's environment
    pub fn set_env(&mut self, name: &str, value: &str) {
        self.inner_mut()
            .env
            .insert(name.to_string(), value.to_string());
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.inner.env
    }

    pub fn config(&self) -> &PackageConfig {
        &self.inner.config
    }

    pub fn downloader(&self) -> &dyn Downloader {
        self.inner.downloader.as_ref()
    }

    pub fn transforms(&self) -> &TransformLibrary {
        &self.inner.transforms
    }

    /// Position in a chain of nested packages; 0 for a document opened directly
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Where the document was loaded from
    pub fn location(&self) -> Option<&AppUrl> {
        self.inner.location.as_ref()
    }

    /// Base that relative resource references resolve against
    pub fn package_url(&self) -> Option<&PackageUrl> {
        self.inner.package_url.as_ref()
    }

    /// Directory holding the metadata file of an on-disk package
    pub fn doc_dir(&self) -> Option<PathBuf> {
        let package = self.package_url()?;
        if package.package_type() != PackageType::Filesystem {
            return None;
        }
        package
            .metadata_url()
            .to_file_path()
            .and_then(|p| p.parent().map(PathBuf::from))
    }

    /// The package's `lib` directory, if it has one
    pub fn lib_dir(&self) -> Option<PathBuf> {
        self.doc_dir().map(|d| d.join("lib")).filter(|d| d.is_dir())
    }

    /// `Root.Name`, else `Root.Identifier`, else a slug of the document location
    pub fn name(&self) -> String {
        self.find_first_value("Root.Name", None)
            .or_else(|| self.find_first_value("Root.Identifier", None))
            .map(str::to_string)
            .or_else(|| self.location().map(|r| slugify(&r.to_string())))
            .unwrap_or_else(|| "document".to_string())
    }

    pub fn sections(&self) -> &[Section] {
        &self.inner.sections
    }

    /// Section by name, case-insensitive
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.inner
            .sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// All terms of a type, in document order, optionally limited to one section
    ///
    /// Children are searched too, so `Table.Column` finds every column.
    pub fn find(&self, term: &str, section: Option<&str>) -> Vec<&Term> {
        fn walk<'a>(terms: &'a [Term], term: &str, out: &mut Vec<&'a Term>) {
            for t in terms {
                if t.term_is(term) {
                    out.push(t);
                }
                walk(t.children(), term, out);
            }
        }

        let mut found = Vec::new();
        for s in self.inner.sections.iter().filter(|s| {
            section.is_none_or(|name| s.name.eq_ignore_ascii_case(name))
        }) {
            walk(&s.terms, term, &mut found);
        }
        found
    }

    /// First term of a type; with `name`, the first whose value or `name` property matches
    pub fn find_first(&self, term: &str, section: Option<&str>, name: Option<&str>) -> Option<&Term> {
        self.find(term, section).into_iter().find(|t| match name {
            None => true,
            Some(name) => t.value() == Some(name) || t.name() == Some(name),
        })
    }

    /// Value of the first term of a type
    pub fn find_first_value(&self, term: &str, section: Option<&str>) -> Option<&str> {
        self.find_first(term, section, None).and_then(Term::value)
    }

    /// Append a term to a section, creating the section if needed
    pub fn add_term(&mut self, section: &str, term: Term) {
        let inner = self.inner_mut();
        match inner
            .sections
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(section))
        {
            Some(s) => s.terms.push(term),
            None => {
                let mut s = Section::new(section);
                s.terms.push(term);
                inner.sections.push(s);
            }
        }
    }

    /// The error map of a resource term, shared by every handle on that term
    pub(crate) fn error_slot(&self, term: &Term) -> SharedErrors {
        let key = format!(
            "{}:{}",
            term.record_term(),
            term.name().or(term.value()).unwrap_or_default()
        );
        let mut slots = self
            .inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key).or_default())
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.find("Root.Datafile", None)
            .into_iter()
            .map(|t| Resource::new(self.clone(), t.clone()))
            .collect()
    }

    pub fn resource(&self, name: &str) -> Option<Resource> {
        self.resources().into_iter().find(|r| r.name() == Some(name))
    }

    pub fn references(&self) -> Vec<Resource> {
        self.find("Root.Reference", None)
            .into_iter()
            .map(|t| Resource::new(self.clone(), t.clone()))
            .collect()
    }

    pub fn reference(&self, name: &str) -> Option<Resource> {
        self.references().into_iter().find(|r| r.name() == Some(name))
    }

    /// Resource or reference by name
    pub fn find_resource(&self, name: &str) -> Option<Resource> {
        self.resource(name).or_else(|| self.reference(name))
    }

    pub fn distributions(&self) -> Vec<Distribution> {
        self.find("Root.Distribution", None)
            .into_iter()
            .map(|t| Distribution::new(self.clone(), t.clone()))
            .collect()
    }

    pub fn tables(&self) -> Vec<Table> {
        self.find("Root.Table", None)
            .into_iter()
            .map(table_from_term)
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.find_first("Root.Table", None, Some(name))
            .map(table_from_term)
    }

    /// Resolver for references made from this document
    pub fn resolver(&self) -> UrlResolver<'_> {
        UrlResolver::new(self.package_url(), self, self.inner.config.max_nesting_depth)
    }

    /// Make a reference absolute against the package directory, or the working
    /// directory when the document has no package location
    pub fn absolute_url(&self, url: &AppUrl) -> Result<AppUrl, UrlError> {
        if url.is_absolute() {
            return Ok(url.clone());
        }
        match self.package_url() {
            Some(package) => package.join_dir(&url.to_string()),
            None => absolute_from_cwd(url),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("location", &self.inner.location)
            .field("package_url", &self.inner.package_url)
            .field("sections", &self.inner.sections.len())
            .field("depth", &self.inner.depth)
            .finish()
    }
}

impl NestedPackageResolver for Document {
    fn resolve_nested(
        &self,
        package: &AppUrl,
        resource: &str,
        depth: usize,
    ) -> Result<AppUrl, UrlError> {
        let lookup_error = |reason: String| UrlError::NestedLookup {
            url: format!("{}#{}", package, resource),
            reason,
        };

        let nested = self.load(package, depth).map_err(|e| match e {
            DocumentError::Url(e @ UrlError::NestingTooDeep { .. }) => e,
            other => lookup_error(other.to_string()),
        })?;
        debug!(package = %package, resource, depth, "Resolving through nested package");

        let target = nested
            .find_resource(resource)
            .ok_or_else(|| lookup_error(format!("no resource named '{}'", resource)))?;
        target.resolved_url()
    }
}

/// Build a schema from a `Root.Table` term and its `Table.Column` children
pub fn table_from_term(term: &Term) -> Table {
    let name = term.value().or(term.name()).unwrap_or_default();
    let columns = term
        .find_children("Table.Column")
        .map(column_from_term)
        .collect();
    Table::new(name, columns)
}

/// Build a column from a `Table.Column` term
pub fn column_from_term(term: &Term) -> Column {
    let mut column = Column::new(term.value().or(term.name()).unwrap_or_default());
    column.alt_name = term.get_value("altname").map(str::to_string);
    column.datatype = term.get_value("datatype").map(DataType::parse);
    column.valuetype = term.get_value("valuetype").map(str::to_string);
    column.transform = term.get_value("transform").map(str::to_string);
    column.json = term.get_value("json").map(str::to_string);
    column.description = term.get_value_or("description", "").to_string();
    column.width = term.get_value("width").and_then(|w| match w.trim().parse() {
        Ok(width) => Some(width),
        Err(_) => {
            warn!(column = %column.name, width = w, "Ignoring invalid column width");
            None
        }
    });
    column
}

fn parse_sections(content: &str) -> Result<Vec<Section>, DocumentError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mapping: serde_yaml::Mapping = serde_yaml::from_str(content)?;

    let mut sections = Vec::new();
    for (key, value) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| DocumentError::InvalidDocument("section names must be strings".to_string()))?
            .to_string();
        let raw: Vec<RawTerm> = match value {
            serde_yaml::Value::Null => Vec::new(),
            other => serde_yaml::from_value(other)?,
        };
        let terms = raw
            .into_iter()
            .map(|t| t.into_term("Root"))
            .collect::<Result<Vec<_>, _>>()?;
        for term in &terms {
            term.warn_unknown_properties();
        }
        sections.push(Section { name, terms });
    }
    Ok(sections)
}

fn absolute_from_cwd(url: &AppUrl) -> Result<AppUrl, UrlError> {
    if url.is_absolute() {
        return Ok(url.clone());
    }
    let cwd = std::env::current_dir().map_err(|e| UrlError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    AppUrl::from_path(&cwd).join_dir(&url.to_string())
}
