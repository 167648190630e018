//! Resolver strategies and their ordered chain

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::{FileResolver, NativeResolver, Package, ResolveError, Store};

/// One way of turning an import path into a package.
///
/// `Ok(None)` means "not mine"; the chain moves on to the next resolver.
pub trait Resolver: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn resolve(&self, path: &str, store: &Store) -> Result<Option<Arc<Package>>, ResolveError>;
}

/// Resolvers tried in fixed priority order; the first hit wins
#[derive(Clone)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverChain {
    /// Native packages first, then on-disk packages under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            resolvers: vec![
                Arc::new(NativeResolver::new()),
                Arc::new(FileResolver::new(root)),
            ],
        }
    }

    /// Host-provided packages only
    pub fn native_only() -> Self {
        Self {
            resolvers: vec![Arc::new(NativeResolver::new())],
        }
    }

    /// An empty chain (resolves nothing)
    pub fn empty() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Append a resolver with the lowest priority so far
    pub fn with(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Resolver names in priority order
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Ask each resolver in turn
    pub fn resolve(&self, path: &str, store: &Store) -> Result<Option<Arc<Package>>, ResolveError> {
        for resolver in &self.resolvers {
            if let Some(pkg) = resolver.resolve(path, store)? {
                debug!(path, resolver = resolver.name(), "package resolved");
                return Ok(Some(pkg));
            }
        }
        debug!(path, "package not found");
        Ok(None)
    }
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FixtureResolver;

    #[test]
    fn test_default_order() {
        let chain = ResolverChain::new("stdlibs").with(Arc::new(FixtureResolver::new()));
        assert_eq!(chain.names(), vec!["native", "file", "fixture"]);
    }

    #[test]
    fn test_native_shadows_later_resolvers() {
        let fixture = FixtureResolver::new().with_file("fmt", "fmt.snip", "package fmt\nvar Shadow = 1");
        let store = Store::new(ResolverChain::native_only().with(Arc::new(fixture)));
        let pkg = store.get_package("fmt").unwrap().unwrap();
        assert!(pkg.is_native());
        assert!(pkg.member("Shadow").is_none());
        assert!(pkg.member("Println").is_some());
    }

    #[test]
    fn test_empty_chain() {
        let store = Store::new(ResolverChain::empty());
        assert!(store.get_package("fmt").unwrap().is_none());
    }
}
