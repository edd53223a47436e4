//! Data Package SDK - Resource resolution and typed row streaming for data packages
//!
//! Provides unified interfaces for:
//! - Term documents describing packages, resources, references, schemas and distributions
//! - Resolving resource references against their package (directories, archives,
//!   spreadsheets, nested packages, notebook artifacts)
//! - Row generators for delimited, spreadsheet, fixed-width, program and nested sources
//! - Casting rows to a schema with per-column transforms and accumulated casting errors
//! - A download cache shared by the resources of a document
//!
//! ```rust,no_run
//! use data_package_sdk::{Document, PackageConfig, StreamItem};
//!
//! let doc = Document::open("path/to/package/", PackageConfig::default())?;
//! for resource in doc.resources() {
//!     for item in resource.rows()? {
//!         match item? {
//!             StreamItem::Header(header) => println!("{}", header.join(",")),
//!             StreamItem::Row(row) => println!("{:?}", row),
//!         }
//!     }
//!     println!("errors: {:?}", resource.errors());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod document;
pub mod generator;
pub mod location;
pub mod models;
pub mod pipeline;
pub mod resource;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigError, PackageConfig, PackageConfigBuilder};
pub use document::{Document, DocumentError, Section, Term, TermKind};
pub use generator::{GeneratorContext, GeneratorError, RowGenerator, get_generator};
pub use location::{AppUrl, PackageType, PackageUrl, UrlError, UrlResolver};
pub use models::{Column, DataType, Table};
pub use pipeline::{
    ErrorMap, Row, RowProcessor, SharedErrors, TransformError, TransformLibrary,
};
pub use resource::{
    ColumnDescriptor, DataFrame, Distribution, Resource, ResourceError, ResourceKind, RowStream,
    StreamItem,
};
pub use storage::{DownloadError, Downloader, FileSystemCache};
