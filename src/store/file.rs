//! On-disk package resolver

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{compile_package, Package, ResolveError, Resolver, Store};
use crate::lang::SOURCE_EXT;

/// Resolves `path` to the `.snip` files in `<root>/<path>`
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for an import path, if the path stays under the root
    pub fn package_dir(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !contained {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Source files of a package directory, sorted by name.
    ///
    /// A missing directory yields no files.
    pub fn source_files(&self, path: &str, dir: &Path) -> Result<Vec<PathBuf>, ResolveError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|source| ResolveError::Io {
            path: path.to_string(),
            dir: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ResolveError::Io {
                path: path.to_string(),
                dir: dir.to_path_buf(),
                source,
            })?;
            let file = entry.path();
            if file.is_file() && file.extension().is_some_and(|ext| ext == SOURCE_EXT) {
                files.push(file);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Resolver for FileResolver {
    fn name(&self) -> &str {
        "file"
    }

    fn resolve(&self, path: &str, store: &Store) -> Result<Option<Arc<Package>>, ResolveError> {
        let Some(dir) = self.package_dir(path) else {
            warn!(path, "import path escapes the package root, ignoring");
            return Ok(None);
        };

        let files = self.source_files(path, &dir)?;
        if files.is_empty() {
            return Ok(None);
        }
        debug!(path, dir = %dir.display(), files = files.len(), "loading package from disk");

        let mut sources = Vec::with_capacity(files.len());
        for file in files {
            let text = fs::read_to_string(&file).map_err(|source| ResolveError::Io {
                path: path.to_string(),
                dir: dir.clone(),
                source,
            })?;
            let name = file
                .strip_prefix(&self.root)
                .unwrap_or(&file)
                .to_string_lossy()
                .into_owned();
            sources.push((name, text));
        }

        compile_package(path, &sources, store)
    }
}
