//! Component discovery and name resolution.
//!
//! A [`Catalog`] is an explicit registration table: each package name
//! maps to an ordered list of named variants, every variant carrying a
//! factory for its concrete implementation. Components are addressed by
//! a qualified name in the `base[:variant]` form; a bare base name is
//! enough when the package registers a single collectible variant.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::HarnessError;

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

/// One registered implementation of a component.
pub struct Variant<T: ?Sized> {
    /// Variant name, the part after `:` in a qualified name.
    pub name: String,
    /// Non-collectible variants exist purely as shared bases and never
    /// participate in name resolution.
    pub collectible: bool,
    factory: Factory<T>,
}

/// Registration table for one kind of component.
pub struct Catalog<T: ?Sized> {
    packages: BTreeMap<String, Vec<Variant<T>>>,
}

impl<T: ?Sized> Default for Catalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Catalog<T> {
    pub fn new() -> Self {
        Self {
            packages: BTreeMap::new(),
        }
    }

    /// Register a variant under a package.
    ///
    /// Variants keep their registration order within a package.
    pub fn register<F>(&mut self, package: &str, variant: &str, collectible: bool, factory: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.packages.entry(package.to_string()).or_default().push(Variant {
            name: variant.to_string(),
            collectible,
            factory: Arc::new(factory),
        });
    }

    /// Resolve a qualified name to a component instance.
    ///
    /// An unknown package or variant is a normal outcome (`Ok(None)`).
    /// A bare name over a package with several collectible variants is a
    /// user-input error that enumerates every candidate.
    pub fn resolve(&self, name: &str) -> Result<Option<Arc<T>>, HarnessError> {
        let (package, variant) = split_name(name);
        let candidates = self.collectible(package);
        if let Some(variant) = variant {
            return Ok(candidates
                .iter()
                .find(|entry| entry.name == variant)
                .map(|entry| (entry.factory)()));
        }
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(Some((candidates[0].factory)())),
            _ => Err(HarnessError::AmbiguousName {
                name: name.to_string(),
                candidates: candidates
                    .iter()
                    .map(|entry| format!("{package}:{}", entry.name))
                    .collect(),
            }),
        }
    }

    /// All collectible variants registered under a package.
    pub fn collectible(&self, package: &str) -> Vec<&Variant<T>> {
        self.packages
            .get(package)
            .map(|variants| variants.iter().filter(|entry| entry.collectible).collect())
            .unwrap_or_default()
    }

    /// All qualified names in the catalog, in package order.
    ///
    /// A package with a single collectible variant is listed by its bare
    /// name; otherwise every variant is listed fully qualified.
    pub fn list_all(&self) -> Vec<String> {
        let mut names = Vec::new();
        for package in self.packages.keys() {
            let variants = self.collectible(package);
            if variants.len() == 1 {
                names.push(package.clone());
            } else {
                names.extend(
                    variants
                        .iter()
                        .map(|entry| format!("{package}:{}", entry.name)),
                );
            }
        }
        names
    }
}

/// Split a qualified name into its base and optional variant parts.
///
/// The split happens on the first `:` that is not followed by `/` or
/// `\`, so URL-like and path-like names stay intact. An empty variant
/// part is treated as absent: `multi:` resolves like `multi`.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    let bytes = name.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == b':' && !matches!(bytes.get(index + 1), Some(b'/') | Some(b'\\')) {
            let variant = &name[index + 1..];
            return (&name[..index], (!variant.is_empty()).then_some(variant));
        }
    }
    (name, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync + std::fmt::Debug {
        fn label(&self) -> &'static str;
    }

    #[derive(Debug)]
    struct Impl(&'static str);

    impl Named for Impl {
        fn label(&self) -> &'static str {
            self.0
        }
    }

    fn catalog() -> Catalog<dyn Named> {
        let mut catalog: Catalog<dyn Named> = Catalog::new();
        catalog.register("single", "Default", true, || Arc::new(Impl("single")));
        catalog.register("multi", "Default", true, || Arc::new(Impl("multi-default")));
        catalog.register("multi", "Another", true, || Arc::new(Impl("multi-another")));
        catalog.register("hidden", "Base", false, || Arc::new(Impl("base")));
        catalog.register("hidden", "Default", true, || Arc::new(Impl("derived")));
        catalog
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("target"), ("target", None));
        assert_eq!(split_name("target:Default"), ("target", Some("Default")));
        // A trailing colon means no variant at all
        assert_eq!(split_name("target:"), ("target", None));
        // A colon followed by a slash is not a variant separator
        assert_eq!(split_name("http://host/x"), ("http://host/x", None));
        assert_eq!(
            split_name("c:\\schemas:Default"),
            ("c:\\schemas", Some("Default"))
        );
    }

    #[test]
    fn test_resolve_sole_variant_by_bare_name() {
        let resolved = catalog().resolve("single").unwrap().unwrap();
        assert_eq!(resolved.label(), "single");
    }

    #[test]
    fn test_resolve_exact_variant() {
        let resolved = catalog().resolve("multi:Another").unwrap().unwrap();
        assert_eq!(resolved.label(), "multi-another");
    }

    #[test]
    fn test_resolve_unknown_is_not_an_error() {
        assert!(catalog().resolve("unknown").unwrap().is_none());
        assert!(catalog().resolve("multi:Unknown").unwrap().is_none());
    }

    #[test]
    fn test_resolve_ambiguous_enumerates_candidates() {
        let error = catalog().resolve("multi").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("multi:Default"), "{message}");
        assert!(message.contains("multi:Another"), "{message}");
    }

    #[test]
    fn test_resolve_empty_variant_falls_back_to_bare_name() {
        let resolved = catalog().resolve("single:").unwrap().unwrap();
        assert_eq!(resolved.label(), "single");
        // Ambiguity still applies once the empty variant is dropped
        assert!(catalog().resolve("multi:").is_err());
    }

    #[test]
    fn test_non_collectible_variants_are_invisible() {
        // The shared base does not count towards ambiguity
        let resolved = catalog().resolve("hidden").unwrap().unwrap();
        assert_eq!(resolved.label(), "derived");
        assert!(catalog().resolve("hidden:Base").unwrap().is_none());
    }

    #[test]
    fn test_list_all_collapses_single_variants() {
        assert_eq!(
            catalog().list_all(),
            vec![
                "hidden".to_string(),
                "multi:Default".to_string(),
                "multi:Another".to_string(),
                "single".to_string(),
            ]
        );
    }
}
