//! Rows of a resource in another package

use tracing::debug;

use super::error::GeneratorError;
use super::{GeneratorContext, RawRows, RowGenerator, lazy};
use crate::location::AppUrl;
use crate::resource::Resource;

/// Passes through the raw rows of a resource of another package
///
/// The URL has the form `metapack+<package location>#<resource name>`. Rows come from the
/// nested resource's own row generator, before its schema is applied, so the source
/// header is line 0.
#[derive(Debug, Clone)]
pub struct NestedGenerator {
    url: AppUrl,
    ctx: GeneratorContext,
    package: AppUrl,
    resource: String,
}

impl NestedGenerator {
    pub fn new(url: AppUrl, ctx: GeneratorContext) -> Result<Self, GeneratorError> {
        let resource = url
            .fragment()
            .ok_or_else(|| GeneratorError::Nested {
                url: url.to_string(),
                reason: "no resource name in fragment".to_string(),
            })?
            .to_string();
        let package = ctx
            .document()
            .absolute_url(&url.without_fragment())
            .map_err(|e| nested_error(&url, e))?;
        Ok(Self {
            url,
            ctx,
            package,
            resource,
        })
    }

    /// Location of the nested package
    pub fn package(&self) -> &AppUrl {
        &self.package
    }

    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    /// Open the nested package and look up the resource
    pub fn open_resource(&self) -> Result<Resource, GeneratorError> {
        debug!(package = %self.package, resource = %self.resource, "Opening nested package");
        let document = self
            .ctx
            .document()
            .open_nested(&self.package)
            .map_err(|e| nested_error(&self.url, e))?;
        document
            .find_resource(&self.resource)
            .ok_or_else(|| GeneratorError::Nested {
                url: self.url.to_string(),
                reason: format!("package has no resource named '{}'", self.resource),
            })
    }

    /// The nested resource's row generator, unchanged
    pub fn open_generator(&self) -> Result<Box<dyn RowGenerator>, GeneratorError> {
        self.open_resource()?
            .row_generator()
            .map_err(|e| nested_error(&self.url, e))
    }

    fn open(&self) -> Result<RawRows, GeneratorError> {
        Ok(self.open_generator()?.rows())
    }
}

impl RowGenerator for NestedGenerator {
    fn url(&self) -> &AppUrl {
        &self.url
    }

    fn rows(&self) -> RawRows {
        let this = self.clone();
        lazy(move || this.open())
    }
}

fn nested_error(url: &AppUrl, error: impl std::fmt::Display) -> GeneratorError {
    GeneratorError::Nested {
        url: url.to_string(),
        reason: error.to_string(),
    }
}
