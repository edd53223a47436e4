//! Row generators
//!
//! A row generator turns a resolved target URL into a lazy sequence of raw rows. The
//! strategy is picked once, from the target's protocol and format:
//!
//! | Target                          | Strategy                        |
//! |---------------------------------|---------------------------------|
//! | `program+file:...`              | program stdout parsed as CSV    |
//! | `metapack+...#resource`         | rows of another package's resource |
//! | `csv`, `tsv`, `txt`             | delimited text                  |
//! | `xlsx`                          | spreadsheet sheet               |
//! | `fixed`, `fwf`                  | fixed-width text, schema widths |
//!
//! Construction fails for anything else. Sources are opened on the first pull and
//! reopened every time [`RowGenerator::rows`] is called.

mod delimited;
mod error;
mod fixed;
mod nested;
mod program;
mod source;
mod spreadsheet;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::document::Document;
use crate::location::{AppUrl, NESTED_PACKAGE_PROTO};
use crate::models::Table;
use crate::pipeline::Row;
use crate::storage::Downloader;

pub use delimited::DelimitedGenerator;
pub use error::GeneratorError;
pub use fixed::FixedWidthGenerator;
pub use nested::NestedGenerator;
pub use program::ProgramGenerator;
pub use source::{decode, read_archive_member, read_text};
pub use spreadsheet::SpreadsheetGenerator;

/// Scheme extension of targets produced by running a program
pub const PROGRAM_PROTO: &str = "program";

/// Lazy sequence of raw rows
pub type RawRows = Box<dyn Iterator<Item = Result<Row, GeneratorError>>>;

/// A source of raw rows
pub trait RowGenerator {
    /// The target this generator reads
    fn url(&self) -> &AppUrl;

    /// Start a new pass over the source
    ///
    /// Nothing is opened until the first pull; open failures surface as the first item.
    fn rows(&self) -> RawRows;
}

/// Everything a generator needs besides its target
#[derive(Clone)]
pub struct GeneratorContext {
    document: Document,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub lib_dir: Option<PathBuf>,
    /// Encoding declared by the resource, used when the target declares none
    pub encoding: Option<String>,
    pub schema: Option<Table>,
}

impl GeneratorContext {
    pub fn new(document: &Document) -> Self {
        let working_dir = document
            .doc_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            lib_dir: document.lib_dir(),
            document: document.clone(),
            env: BTreeMap::new(),
            working_dir,
            encoding: None,
            schema: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_encoding(mut self, encoding: Option<String>) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_schema(mut self, schema: Option<Table>) -> Self {
        self.schema = schema;
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn downloader(&self) -> &dyn Downloader {
        self.document.downloader()
    }

    /// Encoding for a target: its own `encoding` argument, the resource's, the default
    pub fn encoding_for(&self, url: &AppUrl) -> String {
        url.encoding()
            .or(self.encoding.as_deref())
            .unwrap_or(self.document.config().default_encoding.as_str())
            .to_string()
    }
}

impl fmt::Debug for GeneratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorContext")
            .field("document", &self.document.name())
            .field("working_dir", &self.working_dir)
            .field("lib_dir", &self.lib_dir)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Strategy chosen for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Program,
    Nested,
    Delimited(Option<u8>),
    Spreadsheet,
    FixedWidth,
}

impl Strategy {
    /// Pick the strategy for a target, or `None` when nothing handles it
    pub fn select(url: &AppUrl) -> Option<Self> {
        match url.proto() {
            PROGRAM_PROTO => return Some(Strategy::Program),
            NESTED_PACKAGE_PROTO => return Some(Strategy::Nested),
            _ => {}
        }
        match url.target_format().as_deref() {
            Some("csv") => Some(Strategy::Delimited(Some(b','))),
            Some("tsv" | "tab") => Some(Strategy::Delimited(Some(b'\t'))),
            Some("txt") => Some(Strategy::Delimited(None)),
            Some("xlsx") => Some(Strategy::Spreadsheet),
            Some("fixed" | "fwf") => Some(Strategy::FixedWidth),
            _ => None,
        }
    }
}

/// Build the generator for a resolved target
///
/// Fails immediately, before anything is read, when no strategy handles the target.
pub fn get_generator(
    url: &AppUrl,
    ctx: GeneratorContext,
) -> Result<Box<dyn RowGenerator>, GeneratorError> {
    let strategy = Strategy::select(url).ok_or_else(|| GeneratorError::NoStrategy {
        url: url.to_string(),
        format: url.target_format().unwrap_or_default(),
    })?;
    debug!(url = %url, ?strategy, "Selected row generator");

    Ok(match strategy {
        Strategy::Program => Box::new(ProgramGenerator::new(url.clone(), ctx)?),
        Strategy::Nested => Box::new(NestedGenerator::new(url.clone(), ctx)?),
        Strategy::Delimited(delimiter) => {
            Box::new(DelimitedGenerator::new(url.clone(), ctx, delimiter))
        }
        Strategy::Spreadsheet => Box::new(SpreadsheetGenerator::new(url.clone(), ctx)),
        Strategy::FixedWidth => Box::new(FixedWidthGenerator::new(url.clone(), ctx)?),
    })
}

/// Iterator that runs its opener on the first pull
pub(crate) struct OpenOnPull<F> {
    opener: Option<F>,
    rows: Option<RawRows>,
}

impl<F> OpenOnPull<F>
where
    F: FnOnce() -> Result<RawRows, GeneratorError>,
{
    pub(crate) fn new(opener: F) -> Self {
        Self {
            opener: Some(opener),
            rows: None,
        }
    }
}

impl<F> Iterator for OpenOnPull<F>
where
    F: FnOnce() -> Result<RawRows, GeneratorError>,
{
    type Item = Result<Row, GeneratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(open) = self.opener.take() {
            match open() {
                Ok(rows) => self.rows = Some(rows),
                Err(e) => return Some(Err(e)),
            }
        }
        self.rows.as_mut()?.next()
    }
}

/// Wrap an opener as a lazy row sequence
pub(crate) fn lazy<F>(opener: F) -> RawRows
where
    F: FnOnce() -> Result<RawRows, GeneratorError> + 'static,
{
    Box::new(OpenOnPull::new(opener))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::PackageConfig;
    use tempfile::TempDir;

    /// A context over an empty document whose cache lives in `temp`
    pub(crate) fn context(temp: &TempDir) -> GeneratorContext {
        let config = PackageConfig::builder()
            .cache_dir(temp.path().join("cache"))
            .build();
        let document = Document::new(config);
        let mut ctx = GeneratorContext::new(&document);
        ctx.working_dir = temp.path().to_path_buf();
        ctx
    }

    pub(crate) fn collect(generator: &dyn RowGenerator) -> Vec<Row> {
        generator.rows().collect::<Result<Vec<_>, _>>().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(raw: &str) -> Option<Strategy> {
        Strategy::select(&AppUrl::parse(raw).unwrap())
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(select("data/a.csv"), Some(Strategy::Delimited(Some(b','))));
        assert_eq!(select("data/a.tsv"), Some(Strategy::Delimited(Some(b'\t'))));
        assert_eq!(select("data/a.txt"), Some(Strategy::Delimited(None)));
        assert_eq!(select("file:///srv/pkg.zip#data/a.csv"), Some(Strategy::Delimited(Some(b','))));
        assert_eq!(select("book.xlsx#Sheet1"), Some(Strategy::Spreadsheet));
        assert_eq!(select("data/a.dat#&format=fixed"), Some(Strategy::FixedWidth));
        assert_eq!(select("program+file:bin/gen.py"), Some(Strategy::Program));
        assert_eq!(select("metapack+http://example.com/pkg/#people"), Some(Strategy::Nested));
        assert_eq!(select("notebooks/make.ipynb#df"), None);
        assert_eq!(select("data/a.parquet"), None);
    }

    #[test]
    fn test_no_strategy_is_construction_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let ctx = test_support::context(&temp);
        let url = AppUrl::parse("notebooks/make.ipynb#df").unwrap();
        let err = get_generator(&url, ctx).err().unwrap();
        assert!(err.is_construction_error());
        assert!(err.user_message().contains("Notebooks"));
    }

    #[test]
    fn test_lazy_open_reports_error_once() {
        let mut rows = lazy(|| {
            Err(GeneratorError::Encoding("bogus".to_string()))
        });
        assert!(matches!(rows.next(), Some(Err(GeneratorError::Encoding(_)))));
        assert!(rows.next().is_none());
    }
}
