//! Resolution of raw resource references into fetchable URLs

use tracing::debug;

use super::app_url::AppUrl;
use super::error::UrlError;
use super::package::PackageUrl;

/// Scheme extension marking a reference to a resource of another package
pub const NESTED_PACKAGE_PROTO: &str = "metapack";

/// Format of notebook files whose outputs provide rows
pub const NOTEBOOK_FORMAT: &str = "ipynb";

/// Kind of target a parsed reference points at
///
/// Exactly one resolution rule applies per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTarget {
    /// Network location, used as is
    Remote,
    /// Notebook-derived artifact, joined against the package directory
    Notebook,
    /// Resource of a package embedded in this one
    NestedPackage,
    /// File relative to an on-disk or archived package
    LocalFile,
}

impl UrlTarget {
    pub fn classify(url: &AppUrl) -> Self {
        if url.is_remote() {
            UrlTarget::Remote
        } else if url.resource_format().as_deref() == Some(NOTEBOOK_FORMAT) {
            UrlTarget::Notebook
        } else if url.proto() == NESTED_PACKAGE_PROTO {
            UrlTarget::NestedPackage
        } else {
            UrlTarget::LocalFile
        }
    }
}

/// Looks up a resource inside another package and resolves its URL
///
/// Implemented by the document layer, which knows how to open packages.
pub trait NestedPackageResolver {
    /// Resolve resource `resource` of the package whose metadata lives at `package`
    ///
    /// `depth` is the chain length including this lookup.
    fn resolve_nested(
        &self,
        package: &AppUrl,
        resource: &str,
        depth: usize,
    ) -> Result<AppUrl, UrlError>;
}

/// Resolves references against a package base
pub struct UrlResolver<'a> {
    package_url: Option<&'a PackageUrl>,
    nested: &'a dyn NestedPackageResolver,
    max_depth: usize,
}

impl<'a> UrlResolver<'a> {
    pub fn new(
        package_url: Option<&'a PackageUrl>,
        nested: &'a dyn NestedPackageResolver,
        max_depth: usize,
    ) -> Self {
        Self {
            package_url,
            nested,
            max_depth,
        }
    }

    /// Resolve a raw reference
    pub fn resolve(&self, raw: &str) -> Result<AppUrl, UrlError> {
        self.resolve_at(raw, 0)
    }

    /// Resolve a raw reference reached through `depth` nested packages
    pub fn resolve_at(&self, raw: &str, depth: usize) -> Result<AppUrl, UrlError> {
        if depth > self.max_depth {
            return Err(UrlError::NestingTooDeep {
                url: raw.to_string(),
                depth,
                max: self.max_depth,
            });
        }

        let url = AppUrl::parse(raw)?;
        let target = UrlTarget::classify(&url);
        debug!(reference = raw, ?target, depth, "Resolving reference");

        match target {
            UrlTarget::Remote => Ok(url),
            UrlTarget::Notebook => self.resolve_notebook(url),
            UrlTarget::NestedPackage => self.resolve_nested(url, depth),
            UrlTarget::LocalFile => self.resolve_local(url, raw),
        }
    }

    fn resolve_notebook(&self, url: AppUrl) -> Result<AppUrl, UrlError> {
        let Some(package) = self.package_url else {
            return Ok(url);
        };
        let mut target = package.join_dir(url.path())?;
        target.set_scheme_extension(url.scheme_extension());
        target.set_fragment(url.fragment());
        for (key, value) in url.fragment_args() {
            target.set_fragment_arg(key, value);
        }
        Ok(target)
    }

    fn resolve_nested(&self, url: AppUrl, depth: usize) -> Result<AppUrl, UrlError> {
        let resource = url
            .fragment()
            .ok_or_else(|| UrlError::NestedLookup {
                url: url.to_string(),
                reason: "no resource name in fragment".to_string(),
            })?
            .to_string();

        let location = url.without_fragment();
        let package = match self.package_url {
            Some(base) if !location.is_absolute() => base.join_dir(&location.to_string())?,
            _ => location,
        };

        self.nested.resolve_nested(&package, &resource, depth + 1)
    }

    fn resolve_local(&self, url: AppUrl, raw: &str) -> Result<AppUrl, UrlError> {
        let Some(package) = self.package_url else {
            return Ok(url);
        };

        let mut target = package.resolve_url(raw)?;
        target.set_scheme_extension(url.scheme_extension());
        if target.fragment().is_none() && url.fragment().is_some() {
            target.set_fragment(url.fragment());
        }
        AppUrl::parse(&target.to_string())
    }
}

/// Resolver for contexts that cannot open packages
pub struct NoNestedPackages;

impl NestedPackageResolver for NoNestedPackages {
    fn resolve_nested(
        &self,
        package: &AppUrl,
        resource: &str,
        _depth: usize,
    ) -> Result<AppUrl, UrlError> {
        Err(UrlError::NestedLookup {
            url: format!("{}#{}", package, resource),
            reason: "nested packages are not available here".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &str = "metadata.yaml";

    /// Resolves every nested lookup to `<package dir>/<resource>.csv`
    struct FlatPackages;

    impl NestedPackageResolver for FlatPackages {
        fn resolve_nested(
            &self,
            package: &AppUrl,
            resource: &str,
            _depth: usize,
        ) -> Result<AppUrl, UrlError> {
            package.join(&format!("{}.csv", resource))
        }
    }

    /// Points every lookup back at itself
    struct CyclicPackages;

    impl NestedPackageResolver for CyclicPackages {
        fn resolve_nested(
            &self,
            package: &AppUrl,
            resource: &str,
            depth: usize,
        ) -> Result<AppUrl, UrlError> {
            let resolver = UrlResolver::new(None, self, 4);
            resolver.resolve_at(&format!("metapack+{}#{}", package, resource), depth)
        }
    }

    fn fs_package() -> PackageUrl {
        PackageUrl::parse("file:///srv/pkg/metadata.yaml", META).unwrap()
    }

    #[test]
    fn test_classify_targets() {
        let classify = |raw: &str| UrlTarget::classify(&AppUrl::parse(raw).unwrap());
        assert_eq!(classify("http://example.com/a.csv"), UrlTarget::Remote);
        assert_eq!(classify("metapack+http://example.com/pkg/#a"), UrlTarget::Remote);
        assert_eq!(classify("notebooks/make.ipynb#df"), UrlTarget::Notebook);
        assert_eq!(classify("metapack+file:../other/#a"), UrlTarget::NestedPackage);
        assert_eq!(classify("data/a.csv"), UrlTarget::LocalFile);
    }

    #[test]
    fn test_remote_unchanged() {
        let package = fs_package();
        let resolver = UrlResolver::new(Some(&package), &NoNestedPackages, 8);
        let url = resolver.resolve("https://example.com/data.csv#x").unwrap();
        assert_eq!(url.to_string(), "https://example.com/data.csv#x");
    }

    #[test]
    fn test_local_propagates_extension_and_fragment() {
        let package = fs_package();
        let resolver = UrlResolver::new(Some(&package), &NoNestedPackages, 8);
        let url = resolver.resolve("program+file:bin/gen.sh#out").unwrap();
        assert_eq!(url.to_string(), "program+file:///srv/pkg/bin/gen.sh#out");
    }

    #[test]
    fn test_notebook_joins_package_directory() {
        let package = fs_package();
        let resolver = UrlResolver::new(Some(&package), &NoNestedPackages, 8);
        let url = resolver.resolve("notebooks/make.ipynb#frame").unwrap();
        assert_eq!(url.path(), "/srv/pkg/notebooks/make.ipynb");
        assert_eq!(url.fragment(), Some("frame"));
    }

    #[test]
    fn test_nested_package() {
        let package = fs_package();
        let resolver = UrlResolver::new(Some(&package), &FlatPackages, 8);
        let url = resolver.resolve("metapack+file:../other/#people").unwrap();
        assert_eq!(url.to_string(), "file:///srv/other/people.csv");
    }

    #[test]
    fn test_nested_package_requires_resource_name() {
        let package = fs_package();
        let resolver = UrlResolver::new(Some(&package), &FlatPackages, 8);
        let err = resolver.resolve("metapack+file:../other/").unwrap_err();
        assert!(matches!(err, UrlError::NestedLookup { .. }));
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let resolver = UrlResolver::new(None, &CyclicPackages, 4);
        let err = resolver.resolve("metapack+file:///srv/loop/#a").unwrap_err();
        assert!(matches!(err, UrlError::NestingTooDeep { max: 4, .. }));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let package = fs_package();
        let resolver = UrlResolver::new(Some(&package), &FlatPackages, 8);
        for raw in [
            "data/people.csv",
            "data/people.csv#&encoding=latin1",
            "program+file:bin/gen.sh",
            "notebooks/make.ipynb#frame",
            "http://example.com/a.csv",
            "metapack+file:../other/#people",
        ] {
            let once = resolver.resolve(raw).unwrap();
            let twice = resolver.resolve(&once.to_string()).unwrap();
            assert_eq!(once, twice, "{}", raw);
        }
    }
}
