//! Resources and references
//!
//! A [`Resource`] is a `Root.Datafile` term of a document: a raw reference to a
//! tabular source plus an optional schema. It resolves the reference against the
//! document's package, picks a row generator for the target, and streams the header
//! followed by rows cast to the schema.
//!
//! A reference (`Root.Reference`) behaves the same, except that a reference to a
//! resource of another package streams that resource's own rows unchanged.

mod distribution;
mod error;
mod headers;
mod stream;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::document::{Document, Term, TermKind, column_from_term, slugify, table_from_term};
use crate::generator::{
    GeneratorContext, NestedGenerator, RawRows, RowGenerator, get_generator, read_text,
};
use crate::location::{AppUrl, NESTED_PACKAGE_PROTO, UrlError};
use crate::models::Table;
use crate::pipeline::{ErrorMap, Row, RowProcessor, SharedErrors, TransformError, TransformPlan};

pub use distribution::Distribution;
pub use error::ResourceError;
pub use headers::{coalesce_headers, parse_header_lines};
pub use stream::{RowStream, StreamItem};

use stream::{Body, HeaderPlan};

/// Whether a resource term is a plain resource or a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Resource,
    Reference,
}

/// Description of one schema column, for introspection and rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    /// 0-based position in the output row
    pub pos: usize,
    pub name: String,
    /// Output header
    pub header: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    pub description: String,
    /// Dotted path used by [`Resource::iter_struct`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
    /// Every property of the column term
    pub props: BTreeMap<String, String>,
}

/// Rows of a resource held in memory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFrame {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    /// Casting errors of the rows read
    pub errors: ErrorMap,
}

impl DataFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, by header
    pub fn column(&self, header: &str) -> Option<Vec<&Value>> {
        let pos = self.headers.iter().position(|h| h == header)?;
        Some(self.rows.iter().map(|r| r.get(pos).unwrap_or(&Value::Null)).collect())
    }
}

/// A resource or reference term, bound to its document
///
/// Every handle on the same term of a document shares the error map of the most
/// recent pass.
#[derive(Clone)]
pub struct Resource {
    document: Document,
    term: Term,
    errors: SharedErrors,
}

impl Resource {
    pub fn new(document: Document, term: Term) -> Self {
        let errors = document.error_slot(&term);
        Self {
            document,
            term,
            errors,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self.term.kind() {
            TermKind::Reference => ResourceKind::Reference,
            _ => ResourceKind::Resource,
        }
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn name(&self) -> Option<&str> {
        self.term.name()
    }

    /// The raw reference, as written in the document
    pub fn url(&self) -> Option<&str> {
        self.term.value().filter(|v| !v.trim().is_empty())
    }

    pub fn get_value(&self, property: &str) -> Option<&str> {
        self.term.get_value(property)
    }

    pub fn get_value_or<'a>(&'a self, property: &str, default: &'a str) -> &'a str {
        self.term.get_value_or(property, default)
    }

    fn raw_url(&self) -> Result<&str, ResourceError> {
        self.url().ok_or_else(|| ResourceError::MissingUrl {
            name: self.name().unwrap_or_default().to_string(),
        })
    }

    /// The raw reference, parsed
    pub fn parsed_url(&self) -> Result<AppUrl, ResourceError> {
        Ok(AppUrl::parse(self.raw_url()?)?)
    }

    /// The concrete target of the reference
    ///
    /// Only URL strings are manipulated, except that a reference into another package
    /// reads that package's document to find the resource's own target.
    pub fn resolved_url(&self) -> Result<AppUrl, UrlError> {
        let raw = self.url().ok_or(UrlError::Empty)?;
        self.document
            .resolver()
            .resolve_at(raw, self.document.depth())
    }

    /// The `schema` property, else the resource name
    pub fn schema_name(&self) -> Option<&str> {
        self.get_value("schema").or(self.name())
    }

    /// The `Root.Table` term named by the resource's name, else by its `schema` property
    pub fn schema_term(&self) -> Result<Option<&Term>, ResourceError> {
        let name = self.name().ok_or_else(|| ResourceError::MissingName {
            url: self.url().unwrap_or_default().to_string(),
        })?;

        let table = self
            .document
            .find_first("Root.Table", None, Some(name))
            .or_else(|| {
                self.get_value("schema")
                    .and_then(|s| self.document.find_first("Root.Table", None, Some(s)))
            });
        Ok(table)
    }

    /// The schema, if the resource has one with at least one column
    pub fn schema(&self) -> Result<Option<Table>, ResourceError> {
        Ok(self
            .schema_term()?
            .map(table_from_term)
            .filter(|t| !t.is_empty()))
    }

    /// Output headers from the schema
    pub fn headers(&self) -> Result<Option<Vec<String>>, ResourceError> {
        Ok(self.schema()?.map(|t| t.output_headers()))
    }

    /// Headers of the fields the source provides; schema-only columns are left out
    pub fn source_headers(&self) -> Result<Option<Vec<String>>, ResourceError> {
        Ok(self.schema()?.map(|t| t.source_headers()))
    }

    /// Column descriptors: those of a referenced resource in another package first,
    /// then the columns of this resource's own schema
    pub fn columns(&self) -> impl Iterator<Item = ColumnDescriptor> {
        let nested = self
            .nested_resource()
            .map(|r| r.columns().collect::<Vec<_>>())
            .unwrap_or_default();

        let local: Vec<ColumnDescriptor> = match self.schema_term() {
            Ok(Some(term)) => term
                .find_children("Table.Column")
                .enumerate()
                .map(|(pos, c)| {
                    let column = column_from_term(c);
                    ColumnDescriptor {
                        pos,
                        name: c.value().unwrap_or_default().to_string(),
                        header: column.header(pos + 1),
                        datatype: c.get_value("datatype").map(str::to_string),
                        description: column.description,
                        json: column.json,
                        props: c.properties().clone(),
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        nested.into_iter().chain(local)
    }

    /// Environment for transforms and program sources
    pub fn env(&self) -> BTreeMap<String, String> {
        let doc = &self.document;
        let working_dir = doc
            .doc_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        let resolved = self
            .resolved_url()
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.url().unwrap_or_default().to_string());

        let mut env = doc.env().clone();
        env.insert(
            "CACHE_DIR".to_string(),
            doc.downloader().cache_root().display().to_string(),
        );
        env.insert(
            "RESOURCE_NAME".to_string(),
            self.name().unwrap_or_default().to_string(),
        );
        env.insert("RESOLVED_URL".to_string(), resolved);
        env.insert("WORKING_DIR".to_string(), working_dir.clone());
        env.insert(
            "PACKAGE_DOC".to_string(),
            doc.location().map(|u| u.to_string()).unwrap_or_default(),
        );
        env.insert("PACKAGE_WORKING_DIR".to_string(), working_dir);
        env.insert(
            "PACKAGE_URL".to_string(),
            doc.package_url().map(|u| u.to_string()).unwrap_or_default(),
        );
        if self.kind() == ResourceKind::Reference {
            env.insert(
                "REFERENCE_URL".to_string(),
                self.url().unwrap_or_default().to_string(),
            );
        }
        for (key, value) in self.term.properties() {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// File for this resource's compiled transform plan
    ///
    /// The directory is private to the resource and created on demand.
    pub fn code_path(&self) -> Result<PathBuf, ResourceError> {
        let name = self.name().ok_or_else(|| ResourceError::MissingName {
            url: self.url().unwrap_or_default().to_string(),
        })?;
        let sub_dir = format!(
            "{}/{}",
            self.document.config().code_dir_name,
            slugify(&self.document.name())
        );
        let dir = self.document.downloader().make_dirs(&sub_dir)?;
        Ok(dir.join(format!("{}.json", slugify(name))))
    }

    fn generator_context(&self, schema: Option<Table>) -> Result<GeneratorContext, ResourceError> {
        let encoding = self
            .parsed_url()?
            .encoding()
            .or(self.get_value("encoding"))
            .map(str::to_string);
        Ok(GeneratorContext::new(&self.document)
            .with_env(self.env())
            .with_encoding(encoding)
            .with_schema(schema))
    }

    /// Build the raw row source for the resource
    ///
    /// Resolution failures and targets no strategy handles are reported here, before
    /// anything is read. A resource of another package hands back that resource's own
    /// generator.
    pub fn row_generator(&self) -> Result<Box<dyn RowGenerator>, ResourceError> {
        self.generator_with(self.schema_or_none())
    }

    fn schema_or_none(&self) -> Option<Table> {
        self.schema().ok().flatten()
    }

    fn generator_with(&self, schema: Option<Table>) -> Result<Box<dyn RowGenerator>, ResourceError> {
        let raw = self.parsed_url()?;
        let ctx = self.generator_context(schema)?;
        if raw.proto() == NESTED_PACKAGE_PROTO {
            return Ok(NestedGenerator::new(raw, ctx)?.open_generator()?);
        }

        let mut target = self.resolved_url()?;
        if target.fragment_arg("format").is_none() && target.target_format().is_none() {
            if let Some(format) = self.get_value("format") {
                target.set_fragment_arg("format", format);
            }
        }
        Ok(get_generator(&target, ctx)?)
    }

    /// The resource of another package this one points at, if any
    fn nested_resource(&self) -> Option<Resource> {
        let raw = self.parsed_url().ok()?;
        if raw.proto() != NESTED_PACKAGE_PROTO {
            return None;
        }
        let ctx = self.generator_context(None).ok()?;
        NestedGenerator::new(raw, ctx).ok()?.open_resource().ok()
    }

    fn start_line(&self, default: usize) -> usize {
        match self.get_value("startline") {
            Some(v) => v.trim().parse().unwrap_or_else(|_| {
                debug!(startline = v, "Unparseable start line, using default");
                self.document.config().default_start_line
            }),
            None => default,
        }
    }

    /// Start a new pass: the header, then every data row
    ///
    /// With a schema, the header comes from the schema and rows from the start line on
    /// are cast to it. Without one, the header is coalesced from the `headerlines` of the
    /// source and rows are passed through as read. A reference to a resource in another
    /// package streams that resource's rows instead.
    ///
    /// Errors of the previous pass are cleared.
    pub fn rows(&self) -> Result<RowStream, ResourceError> {
        self.lock_errors().clear();

        if self.kind() == ResourceKind::Reference {
            let raw = self.parsed_url()?;
            if raw.proto() == NESTED_PACKAGE_PROTO {
                let nested = NestedGenerator::new(raw, self.generator_context(None)?)?;
                let resource = nested.open_resource()?;
                info!(
                    reference = self.name().unwrap_or_default(),
                    package = %nested.package(),
                    "Delegating to nested resource"
                );
                return Ok(RowStream::delegated(resource.rows()?));
            }
        }

        let schema = self.schema()?;
        let generator = self.generator_with(schema.clone())?;
        let default_start = self.document.config().default_start_line;

        match schema {
            Some(table) => {
                let plan = self.document.transforms().compile_table(&table)?;
                if !plan.is_empty() {
                    self.write_plan(&plan)?;
                }
                let start = self.start_line(default_start);
                let rows: RawRows = Box::new(generator.rows().skip(start));
                let header = table.output_headers();
                let processor = RowProcessor::new(
                    rows,
                    table,
                    plan,
                    self.env(),
                    Arc::clone(&self.errors),
                    start,
                );
                Ok(RowStream::new(
                    HeaderPlan::Declared(header),
                    Body::Typed(processor),
                ))
            }
            None => {
                let lines = parse_header_lines(self.get_value("headerlines"));
                let after_header = lines.iter().max().map_or(0, |l| l + 1);
                let start = self.start_line(default_start.max(after_header));
                Ok(RowStream::new(
                    HeaderPlan::Intuit(lines),
                    Body::Raw {
                        rows: generator.rows(),
                        start,
                        line: 0,
                        pending: VecDeque::new(),
                    },
                ))
            }
        }
    }

    fn write_plan(&self, plan: &TransformPlan) -> Result<(), ResourceError> {
        let path = self.code_path()?;
        let json = plan.to_json()?;
        std::fs::write(&path, json).map_err(|e| TransformError::Plan {
            path: path.clone(),
            error: e.to_string(),
        })?;
        debug!(path = %path.display(), "Wrote transform plan");
        Ok(())
    }

    /// Casting errors of the most recent completed pass, keyed by column
    pub fn errors(&self) -> ErrorMap {
        self.lock_errors().clone()
    }

    fn lock_errors(&self) -> MutexGuard<'_, ErrorMap> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rows as maps from header to value
    pub fn iter_dict(
        &self,
    ) -> Result<impl Iterator<Item = Result<Map<String, Value>, ResourceError>>, ResourceError>
    {
        let mut headers: Vec<String> = Vec::new();
        Ok(self.rows()?.filter_map(move |item| match item {
            Ok(StreamItem::Header(h)) => {
                headers = h;
                None
            }
            Ok(StreamItem::Row(row)) => Some(Ok(headers.iter().cloned().zip(row).collect())),
            Err(e) => Some(Err(e)),
        }))
    }

    /// Rows as nested objects
    ///
    /// Each value is placed at its column's `json` path (dotted, such as `address.city`),
    /// or under its header when the column has none.
    pub fn iter_struct(
        &self,
    ) -> Result<impl Iterator<Item = Result<Value, ResourceError>>, ResourceError> {
        let declared: Vec<(usize, String)> = self
            .columns()
            .map(|c| (c.pos, c.json.clone().unwrap_or(c.header)))
            .collect();

        let mut paths = declared;
        Ok(self.rows()?.filter_map(move |item| match item {
            Ok(StreamItem::Header(h)) => {
                if paths.is_empty() {
                    paths = h.into_iter().enumerate().collect();
                }
                None
            }
            Ok(StreamItem::Row(row)) => {
                let mut object = Map::new();
                for (pos, path) in &paths {
                    let value = row.get(*pos).cloned().unwrap_or(Value::Null);
                    add_to_struct(&mut object, path, value);
                }
                Some(Ok(Value::Object(object)))
            }
            Err(e) => Some(Err(e)),
        }))
    }

    /// Rows as JSON documents, one per row
    pub fn iter_json(
        &self,
    ) -> Result<impl Iterator<Item = Result<String, ResourceError>>, ResourceError> {
        Ok(self
            .iter_struct()?
            .map(|s| s.and_then(|v| Ok(serde_json::to_string(&v)?))))
    }

    /// Read rows into memory, at most `limit` of them
    pub fn dataframe(&self, limit: Option<usize>) -> Result<DataFrame, ResourceError> {
        let mut stream = self.rows()?;
        let headers = match stream.next().transpose()? {
            Some(StreamItem::Header(h)) => h,
            _ => Vec::new(),
        };

        let mut rows = Vec::new();
        let mut truncated = false;
        loop {
            if limit.is_some_and(|l| rows.len() >= l) {
                truncated = true;
                break;
            }
            match stream.next().transpose()? {
                Some(item) => rows.extend(item.into_row()),
                None => break,
            }
        }
        let errors = if truncated {
            stream.errors()
        } else {
            self.errors()
        };
        Ok(DataFrame {
            headers,
            rows,
            errors,
        })
    }

    /// Text lines of the resolved target
    pub fn readlines(&self) -> Result<Vec<String>, ResourceError> {
        let target = self.resolved_url()?;
        let ctx = self.generator_context(None)?;
        let text = read_text(&target, &ctx)?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("term", &self.term.term())
            .field("name", &self.name())
            .field("url", &self.url())
            .finish()
    }
}

/// Place a value in a nested object at a dotted path
fn add_to_struct(object: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                add_to_struct(child, rest, value);
            }
        }
    }
}
