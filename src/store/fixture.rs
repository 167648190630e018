//! In-memory package sources, mostly for tests

use std::collections::HashMap;
use std::sync::Arc;

use super::{compile_package, Package, ResolveError, Resolver, Store};

/// Resolves import paths from sources registered up front
#[derive(Debug, Clone, Default)]
pub struct FixtureResolver {
    packages: HashMap<String, Vec<(String, String)>>,
}

impl FixtureResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one source file to the package at `path`
    pub fn with_file(mut self, path: &str, name: &str, source: &str) -> Self {
        self.packages
            .entry(path.to_string())
            .or_default()
            .push((name.to_string(), source.to_string()));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.packages.contains_key(path)
    }
}

impl Resolver for FixtureResolver {
    fn name(&self) -> &str {
        "fixture"
    }

    fn resolve(&self, path: &str, store: &Store) -> Result<Option<Arc<Package>>, ResolveError> {
        match self.packages.get(path) {
            Some(sources) => compile_package(path, sources, store),
            None => Ok(None),
        }
    }
}
