//! Tree-walking interpreter for snippet packages
//!
//! A [`Machine`] executes one package: it resolves the package's imports
//! through a [`Store`], registers its top-level declarations, and can then
//! call any of its functions. Every evaluation step marks its [`Op`] in the
//! attached coverage bitmap, if any.
//!
//! The machine is used through a narrow lifecycle:
//!
//! ```text
//! Machine::new -> run_files -> run_func* -> release (or into_package)
//! ```

pub mod builtins;
pub mod errors;
mod eval;
mod exec;
pub mod value;

pub use errors::{Fault, MachineError};
pub use value::{FuncValue, Key, NativeFn, NativeFunc, Stream, Value};

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use tracing::debug;

use crate::coverage::CoverageBitmap;
use crate::lang::ast::{Decl, File};
use crate::lang::Op;
use crate::store::{Package, PackageNode, PackageValue, Store};

/// Default bound on nested snippet calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default bound on nested statement and expression evaluation.
///
/// Each level costs a handful of host stack frames; the harness runs
/// machines on a stack sized for this bound.
pub const DEFAULT_MAX_NESTING: usize = 4096;

/// Identifier of the development chain every context carries
pub const DEV_CHAIN_ID: &str = "dev-chain";

/// Minimal execution context handed to a machine.
///
/// Carried through unmodified; nothing in the machine inspects it beyond
/// exposing it to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    pub pkg_path: String,
    pub chain_id: String,
}

impl ExecContext {
    pub fn new(pkg_path: impl Into<String>) -> Self {
        Self {
            pkg_path: pkg_path.into(),
            chain_id: DEV_CHAIN_ID.to_string(),
        }
    }
}

/// A name bound in some scope
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub value: Value,
    pub mutable: bool,
}

impl Binding {
    fn var(value: Value) -> Self {
        Self {
            value,
            mutable: true,
        }
    }

    fn constant(value: Value) -> Self {
        Self {
            value,
            mutable: false,
        }
    }
}

/// Call deferred until its frame exits
pub(crate) enum Deferred {
    Value(Value, Vec<Value>),
    Builtin(builtins::Builtin, Vec<Value>),
}

/// One active function call
pub(crate) struct Frame {
    /// Declaring package when it is not the machine's own
    package: Option<Arc<Package>>,
    scopes: Vec<HashMap<String, Binding>>,
    defers: Vec<Deferred>,
}

/// Control-flow outcome of a statement
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Interpreter instance for one package
pub struct Machine<'s> {
    /// Path of the package being executed
    pkg_path: Arc<str>,
    /// Name from the `package` clause
    pkg_name: Option<String>,
    /// Resolver-backed package store
    store: &'s Store,
    /// Opaque execution context
    context: ExecContext,
    /// Output sink for print builtins and host functions
    output: Box<dyn Write + 's>,
    /// Coverage bitmap (optional)
    coverage: Option<Arc<CoverageBitmap>>,
    /// Maximum nesting of snippet calls
    max_call_depth: usize,
    /// Current statement/expression nesting
    nesting: usize,
    /// Maximum statement/expression nesting
    max_nesting: usize,
    /// Package-level declarations
    globals: HashMap<String, Binding>,
    /// Imported packages by local name
    imports: HashMap<String, Arc<Package>>,
    /// Import paths in first-seen order
    import_paths: Vec<String>,
    /// Files run so far
    files: Vec<String>,
    /// Call stack
    frames: Vec<Frame>,
}

impl<'s> Machine<'s> {
    /// Create a machine for `pkg_path`. Output is discarded until a sink is set.
    pub fn new(pkg_path: &str, store: &'s Store) -> Self {
        debug!(pkg_path, "machine created");
        Self {
            pkg_path: Arc::from(pkg_path),
            pkg_name: None,
            store,
            context: ExecContext::new(pkg_path),
            output: Box::new(std::io::sink()),
            coverage: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            nesting: 0,
            max_nesting: DEFAULT_MAX_NESTING,
            globals: HashMap::new(),
            imports: HashMap::new(),
            import_paths: Vec::new(),
            files: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Set the output sink
    pub fn with_output(mut self, output: impl Write + 's) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Attach a coverage bitmap
    pub fn with_coverage(mut self, coverage: Arc<CoverageBitmap>) -> Self {
        self.coverage = Some(coverage);
        self
    }

    /// Set the execution context
    pub fn with_context(mut self, context: ExecContext) -> Self {
        self.context = context;
        self
    }

    /// Set the maximum call depth
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth.max(1);
        self
    }

    /// Set the maximum statement/expression nesting
    pub fn with_max_nesting(mut self, nesting: usize) -> Self {
        self.max_nesting = nesting.max(1);
        self
    }

    pub fn pkg_path(&self) -> &str {
        &self.pkg_path
    }

    pub fn context(&self) -> &ExecContext {
        &self.context
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Current value of a package-level declaration
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name).map(|b| &b.value)
    }

    #[inline]
    pub(crate) fn mark(&self, op: Op) {
        if let Some(ref cov) = self.coverage {
            cov.mark(op.index());
        }
    }

    /// Run `f` one nesting level deeper
    #[inline]
    pub(crate) fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Fault>,
    ) -> Result<T, Fault> {
        if self.nesting >= self.max_nesting {
            return Err(Fault::NestingExceeded(self.max_nesting));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    /// Resolve imports and register every top-level declaration of `files`.
    ///
    /// Functions are registered before variables are initialised, so
    /// initialisers may call any function of the package. Variables are
    /// initialised in source order.
    pub fn run_files(&mut self, files: &[File]) -> Result<(), MachineError> {
        for file in files {
            if let Some(ref name) = file.package {
                match self.pkg_name {
                    Some(ref expected) if expected != name => {
                        return Err(MachineError::PackageMismatch {
                            file: file.name.clone(),
                            expected: expected.clone(),
                            found: name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => self.pkg_name = Some(name.clone()),
                }
            }
        }

        for file in files {
            for spec in &file.imports {
                self.mark(Op::Import);
                let package = self
                    .store
                    .get_package(&spec.path)?
                    .ok_or_else(|| MachineError::Unresolved {
                        path: spec.path.clone(),
                    })?;
                let local = spec
                    .alias
                    .clone()
                    .unwrap_or_else(|| package.node.name.clone());
                debug!(pkg = %self.pkg_path, import = %spec.path, local = %local, "import resolved");
                if !self.import_paths.contains(&spec.path) {
                    self.import_paths.push(spec.path.clone());
                }
                self.imports.insert(local, package);
            }
        }

        for file in files {
            for decl in &file.decls {
                if let Decl::Func(func) = decl {
                    self.mark(Op::FuncDecl);
                    self.declare_global(
                        &func.name,
                        Binding::constant(Value::Func(FuncValue {
                            pkg: self.pkg_path.clone(),
                            decl: func.clone(),
                        })),
                    )?;
                }
            }
        }

        for file in files {
            for decl in &file.decls {
                if let Decl::Var(spec) = decl {
                    self.mark(Op::VarDecl);
                    let value = match spec.value {
                        Some(ref expr) => self.eval(expr)?,
                        None => Value::zero(spec.ty.as_ref()),
                    };
                    let binding = if spec.is_const {
                        Binding::constant(value)
                    } else {
                        Binding::var(value)
                    };
                    self.declare_global(&spec.name, binding)?;
                }
            }
            self.files.push(file.name.clone());
        }

        Ok(())
    }

    fn declare_global(&mut self, name: &str, binding: Binding) -> Result<(), MachineError> {
        if name == "_" {
            return Ok(());
        }
        if self.globals.contains_key(name) {
            return Err(MachineError::Redeclared {
                name: name.to_string(),
            });
        }
        self.globals.insert(name.to_string(), binding);
        Ok(())
    }

    /// Call a parameterless package-level function and return its result
    pub fn run_func(&mut self, name: &str) -> Result<Value, MachineError> {
        let func = match self.globals.get(name) {
            Some(Binding {
                value: Value::Func(func),
                ..
            }) => func.clone(),
            Some(other) => return Err(Fault::NotCallable(other.value.to_string()).into()),
            None => return Err(Fault::Undefined(name.to_string()).into()),
        };
        if !func.decl.params.is_empty() {
            return Err(Fault::arg_count(name, 0, func.decl.params.len()).into());
        }
        debug!(pkg = %self.pkg_path, func = name, "running function");
        Ok(self.call_function(&func, Vec::new())?)
    }

    /// Release the machine and everything it holds
    pub fn release(self) {
        drop(self);
    }

    /// Convert the executed package into a package descriptor.
    ///
    /// Returns `None` when the package declared nothing.
    pub fn into_package(mut self) -> Option<Package> {
        if self.globals.is_empty() {
            return None;
        }
        let name = self.pkg_name.take().unwrap_or_else(|| {
            self.pkg_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.pkg_path)
                .to_string()
        });
        let members = std::mem::take(&mut self.globals)
            .into_iter()
            .map(|(name, binding)| (name, binding.value))
            .collect();
        Some(Package {
            node: PackageNode {
                name,
                path: self.pkg_path.to_string(),
                files: std::mem::take(&mut self.files),
                imports: std::mem::take(&mut self.import_paths),
            },
            value: PackageValue {
                members,
                imports: std::mem::take(&mut self.imports),
            },
        })
    }

    // =========================================================================
    // Name resolution
    // =========================================================================

    fn current_package(&self) -> Option<&Arc<Package>> {
        self.frames.last().and_then(|f| f.package.as_ref())
    }

    /// Look a name up: innermost scope outwards, then package level
    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.frames.last() {
            for scope in frame.scopes.iter().rev() {
                if let Some(binding) = scope.get(name) {
                    return Some(binding.value.clone());
                }
            }
        }
        match self.current_package() {
            Some(pkg) => pkg.value.members.get(name).cloned(),
            None => self.globals.get(name).map(|b| b.value.clone()),
        }
    }

    pub(crate) fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Imported package visible under `name` in the current frame
    pub(crate) fn import(&self, name: &str) -> Option<Arc<Package>> {
        match self.current_package() {
            Some(pkg) => pkg.value.imports.get(name).cloned(),
            None => self.imports.get(name).cloned(),
        }
    }

    /// Bind a new name in the innermost scope
    pub(crate) fn declare(&mut self, name: &str, value: Value, mutable: bool) {
        if name == "_" {
            return;
        }
        let binding = Binding { value, mutable };
        match self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
            Some(scope) => {
                scope.insert(name.to_string(), binding);
            }
            None => {
                self.globals.insert(name.to_string(), binding);
            }
        }
    }

    /// Whether `name` is bound in the innermost scope
    pub(crate) fn declared_in_scope(&self, name: &str) -> bool {
        self.frames
            .last()
            .and_then(|f| f.scopes.last())
            .is_some_and(|scope| scope.contains_key(name))
    }

    /// Assign to an existing name
    pub(crate) fn set_name(&mut self, name: &str, value: Value) -> Result<(), Fault> {
        if name == "_" {
            return Ok(());
        }
        if let Some(frame) = self.frames.last_mut() {
            for scope in frame.scopes.iter_mut().rev() {
                if let Some(binding) = scope.get_mut(name) {
                    if !binding.mutable {
                        return Err(Fault::ReadOnly(name.to_string()));
                    }
                    binding.value = value;
                    return Ok(());
                }
            }
            if let Some(ref pkg) = frame.package {
                if pkg.value.members.contains_key(name) {
                    return Err(Fault::ReadOnly(format!("{}.{}", pkg.node.path, name)));
                }
                return Err(Fault::Undefined(name.to_string()));
            }
        }
        match self.globals.get_mut(name) {
            Some(binding) if binding.mutable => {
                binding.value = value;
                Ok(())
            }
            Some(_) => Err(Fault::ReadOnly(name.to_string())),
            None => Err(Fault::Undefined(name.to_string())),
        }
    }

    pub(crate) fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(HashMap::new());
        }
    }

    pub(crate) fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.pop();
        }
    }

    /// Run `f` inside a fresh block scope
    pub(crate) fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Fault>,
    ) -> Result<T, Fault> {
        self.push_scope();
        let result = f(self);
        self.pop_scope();
        result
    }

    pub(crate) fn write_output(&mut self, text: &str) -> Result<(), Fault> {
        self.output
            .write_all(text.as_bytes())
            .map_err(|e| Fault::Panic(format!("write to output: {}", e)))
    }
}

impl Drop for Machine<'_> {
    fn drop(&mut self) {
        let _ = self.output.flush();
        debug!(pkg = %self.pkg_path, "machine released");
    }
}
