//! Package store and resolvers
//!
//! A [`Store`] turns import paths into package descriptors. It asks its
//! [`ResolverChain`] on first use and caches the result for the rest of the
//! invocation; nested compilations share the same store, so a dependency
//! imported by several packages is compiled once.
//!
//! ```text
//! Store::get_package(path)
//!   ├─ cache hit           -> descriptor
//!   └─ ResolverChain
//!        ├─ NativeResolver   host-provided packages (os, fmt, encoding/json)
//!        ├─ FileResolver     <root>/<path>/*.snip via compile_package
//!        └─ extras           e.g. FixtureResolver
//! ```

pub mod file;
pub mod fixture;
pub mod native;
pub mod resolver;

pub use file::FileResolver;
pub use fixture::FixtureResolver;
pub use native::NativeResolver;
pub use resolver::{Resolver, ResolverChain};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::lang::{parse_file, ParseError};
use crate::machine::{Machine, MachineError, Value};

/// Declaration half of a package descriptor
#[derive(Debug, Clone)]
pub struct PackageNode {
    /// Package name (from the `package` clause or the last path segment)
    pub name: String,
    /// Import path
    pub path: String,
    /// Source files the package was compiled from (empty for native packages)
    pub files: Vec<String>,
    /// Import paths the package depends on
    pub imports: Vec<String>,
}

/// Runtime half of a package descriptor
#[derive(Debug, Clone, Default)]
pub struct PackageValue {
    /// Exported and unexported package-level values
    pub members: HashMap<String, Value>,
    /// Resolved dependencies by local name
    pub imports: HashMap<String, Arc<Package>>,
}

/// A fully resolved package. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Package {
    pub node: PackageNode,
    pub value: PackageValue,
}

impl Package {
    /// Package backed by host functions
    pub fn native(path: &str, members: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            node: PackageNode {
                name,
                path: path.to_string(),
                files: Vec::new(),
                imports: Vec::new(),
            },
            value: PackageValue {
                members: members
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
                imports: HashMap::new(),
            },
        }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.value.members.get(name)
    }

    pub fn is_native(&self) -> bool {
        self.node.files.is_empty()
    }

    /// Member names, sorted
    pub fn member_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.value.members.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Resolution failure other than "not found"
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("import cycle: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("failed to read package {path:?} at {}: {source}", .dir.display())]
    Io {
        path: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile package {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to initialise package {path:?}: {source}")]
    Init {
        path: String,
        #[source]
        source: Box<MachineError>,
    },
}

/// Resolver-backed package cache for one invocation
pub struct Store {
    chain: ResolverChain,
    cache: Mutex<HashMap<String, Arc<Package>>>,
    /// Paths currently being resolved, outermost first
    loading: Mutex<Vec<String>>,
}

impl Store {
    pub fn new(chain: ResolverChain) -> Self {
        Self {
            chain,
            cache: Mutex::new(HashMap::new()),
            loading: Mutex::new(Vec::new()),
        }
    }

    pub fn chain(&self) -> &ResolverChain {
        &self.chain
    }

    /// Resolve `path`, consulting the cache first.
    ///
    /// `Ok(None)` means no resolver knows the path.
    pub fn get_package(&self, path: &str) -> Result<Option<Arc<Package>>, ResolveError> {
        if let Some(pkg) = self.cached(path) {
            return Ok(Some(pkg));
        }

        {
            let mut loading = self.loading.lock();
            if loading.iter().any(|p| p == path) {
                let mut chain = loading.clone();
                chain.push(path.to_string());
                return Err(ResolveError::Cycle { chain });
            }
            loading.push(path.to_string());
        }

        let result = self.chain.resolve(path, self);

        self.loading.lock().retain(|p| p != path);

        let resolved = result?;
        if let Some(ref pkg) = resolved {
            self.cache.lock().insert(path.to_string(), pkg.clone());
        }
        Ok(resolved)
    }

    /// Previously resolved package, without resolving
    pub fn cached(&self, path: &str) -> Option<Arc<Package>> {
        self.cache.lock().get(path).cloned()
    }

    /// Number of cached packages
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compile package sources into a descriptor.
///
/// `sources` are `(file name, text)` pairs. The package's top-level
/// declarations run on a throwaway machine bound to `store` (no coverage,
/// output discarded); only the resulting descriptor survives. No files, or
/// files that declare nothing, yield `Ok(None)`.
pub fn compile_package(
    path: &str,
    sources: &[(String, String)],
    store: &Store,
) -> Result<Option<Arc<Package>>, ResolveError> {
    if sources.is_empty() {
        return Ok(None);
    }

    let files = sources
        .iter()
        .map(|(name, text)| parse_file(name, text))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ResolveError::Parse {
            path: path.to_string(),
            source,
        })?;

    let mut machine = Machine::new(path, store);
    machine
        .run_files(&files)
        .map_err(|source| ResolveError::Init {
            path: path.to_string(),
            source: Box::new(source),
        })?;

    let package = machine.into_package();
    debug!(
        path,
        files = sources.len(),
        members = package.as_ref().map_or(0, |p| p.value.members.len()),
        "package compiled"
    );
    Ok(package.map(Arc::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_store(files: &[(&str, &str, &str)]) -> Store {
        let mut fixture = FixtureResolver::new();
        for (path, name, src) in files {
            fixture = fixture.with_file(path, name, src);
        }
        Store::new(ResolverChain::native_only().with(Arc::new(fixture)))
    }

    #[test]
    fn test_compile_package_members() {
        let store = Store::new(ResolverChain::native_only());
        let sources = vec![(
            "a.snip".to_string(),
            "package calc\nconst Ten = 10\nfunc Double(x int) int { return x * 2 }".to_string(),
        )];
        let pkg = compile_package("lib/calc", &sources, &store).unwrap().unwrap();
        assert_eq!(pkg.node.name, "calc");
        assert_eq!(pkg.member_names(), vec!["Double", "Ten"]);
        assert!(!pkg.is_native());
    }

    #[test]
    fn test_compile_empty_unit_is_not_found() {
        let store = Store::new(ResolverChain::native_only());
        let sources = vec![("a.snip".to_string(), "package empty\n".to_string())];
        assert!(compile_package("empty", &sources, &store).unwrap().is_none());
        assert!(compile_package("none", &[], &store).unwrap().is_none());
    }

    #[test]
    fn test_store_caches_packages() {
        let store = fixture_store(&[("lib/a", "a.snip", "package a\nvar X = 1")]);
        let first = store.get_package("lib/a").unwrap().unwrap();
        let second = store.get_package("lib/a").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_import_cycle_detected() {
        let store = fixture_store(&[
            ("cyc/a", "a.snip", "package a\nimport \"cyc/b\"\nvar X = 1"),
            ("cyc/b", "b.snip", "package b\nimport \"cyc/a\"\nvar Y = 2"),
        ]);
        let err = store.get_package("cyc/a").unwrap_err();
        // the cycle surfaces wrapped in the outer package's init failure
        let msg = err.to_string();
        assert!(msg.contains("import cycle: cyc/a -> cyc/b -> cyc/a"), "{}", msg);
    }

    #[test]
    fn test_parse_error_names_file() {
        let store = fixture_store(&[("bad", "broken.snip", "package bad\nfunc {")]);
        let err = store.get_package("bad").unwrap_err();
        assert!(matches!(err, ResolveError::Parse { .. }));
        assert!(err.to_string().contains("broken.snip"));
    }
}
