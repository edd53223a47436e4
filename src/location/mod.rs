//! URL model and reference resolution
//!
//! Turns the raw URL string of a resource term into a concrete, fetchable target,
//! taking the containing package into account:
//!
//! - **Remote** references (`http`, `https`, `s3`, ...) are used unchanged
//! - **Notebook** references are joined against the package directory
//! - **Nested package** references (`metapack+...#resource`) resolve to the target of
//!   the named resource inside the other package, recursively and with a bounded depth
//! - **Local file** references resolve against the package base (directory, archive,
//!   spreadsheet or tabular file)

mod app_url;
mod error;
mod package;
mod resolver;

pub use app_url::AppUrl;
pub(crate) use app_url::extension_of;
pub use error::UrlError;
pub use package::{PackageType, PackageUrl, metadata_url};
pub use resolver::{
    NESTED_PACKAGE_PROTO, NOTEBOOK_FORMAT, NestedPackageResolver, NoNestedPackages, UrlResolver,
    UrlTarget,
};
