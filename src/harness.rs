//! Execution harness
//!
//! Runs one snippet against a fresh machine and store, measuring which
//! instrumentation sites it touched.
//!
//! ```text
//! run(snippet, entry)
//!   1. reset coverage
//!   2. parse snippet               -> HarnessError::Parse
//!   3. build resolver chain + store
//!   4. build machine (context, output buffer, coverage)
//!   5. register declarations       -> HarnessError::Resolution / Fault
//!   6. call entry                  -> HarnessError::Fault (panics included)
//!   7. release machine, return captured output
//! ```
//!
//! Each harness owns its own [`CoverageBitmap`], so two harnesses can measure
//! concurrently. Runs on the same harness are serialised.
//!
//! Steps 2 to 7 run on a dedicated thread with an [`EXEC_STACK_SIZE`] stack.
//! The machine's call depth and nesting bounds keep a snippet well inside
//! it, so runaway recursion ends as a fault instead of a host stack overflow.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::HarnessSection;
use crate::coverage::{CoverageBitmap, CoverageDump};
use crate::lang::{parse_file, ParseError};
use crate::machine::{ExecContext, Fault, Machine, MachineError, Value};
use crate::store::{ResolveError, Resolver, ResolverChain, Store};

pub use crate::machine::DEV_CHAIN_ID;

/// File name reported for snippet parse errors
pub const SNIPPET_FILE: &str = "input.snip";

/// Stack size of the thread a snippet executes on
pub const EXEC_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Harness failure
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Malformed snippet; no machine was built
    #[error("failed to parse snippet: {0}")]
    Parse(#[from] ParseError),

    /// An import could not be resolved
    #[error("{0}")]
    Resolution(String),

    /// Runtime fault in the snippet, with whatever it printed before failing
    #[error("{fault}")]
    Fault { fault: Fault, output: String },

    /// Declarations could not be registered, or execution could not start
    #[error("{0}")]
    Setup(String),
}

impl HarnessError {
    /// Output captured before the failure
    pub fn output(&self) -> &str {
        match self {
            HarnessError::Fault { output, .. } => output,
            _ => "",
        }
    }
}

/// Cloneable in-memory output sink
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Harness settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Root directory of on-disk packages
    pub root_dir: PathBuf,
    /// Package path the snippet runs as
    pub pkg_path: String,
    /// Maximum nested snippet calls
    pub max_call_depth: usize,
    /// Maximum statement/expression nesting
    pub max_nesting: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessSection::default().into()
    }
}

impl From<HarnessSection> for HarnessConfig {
    fn from(section: HarnessSection) -> Self {
        Self {
            root_dir: section.root_dir,
            pkg_path: section.pkg_path,
            max_call_depth: section.max_call_depth,
            max_nesting: section.max_nesting,
        }
    }
}

/// Snippet runner with its own coverage bitmap
pub struct Harness {
    config: HarnessConfig,
    coverage: Arc<CoverageBitmap>,
    extras: Vec<Arc<dyn Resolver>>,
    session: Mutex<()>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            coverage: Arc::new(CoverageBitmap::new()),
            extras: Vec::new(),
            session: Mutex::new(()),
        }
    }

    /// Add a resolver consulted after the native and file resolvers
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.extras.push(resolver);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Bitmap filled by the most recent run
    pub fn coverage(&self) -> &Arc<CoverageBitmap> {
        &self.coverage
    }

    pub fn dump(&self) -> CoverageDump {
        self.coverage.dump()
    }

    pub fn render(&self) -> String {
        self.coverage.render()
    }

    fn resolver_chain(&self) -> ResolverChain {
        self.extras
            .iter()
            .cloned()
            .fold(ResolverChain::new(&self.config.root_dir), ResolverChain::with)
    }

    /// Run `snippet` and call its `entry` function.
    ///
    /// Returns everything the snippet wrote, followed by the display form of
    /// the entry function's result when that is not nil.
    pub fn run(&self, snippet: &str, entry: &str) -> Result<String, HarnessError> {
        let _session = self.session.lock();
        self.coverage.reset();

        let worker = thread::Builder::new()
            .name("snipcov-exec".to_string())
            .stack_size(EXEC_STACK_SIZE);
        let result = thread::scope(|scope| {
            let handle = worker
                .spawn_scoped(scope, || self.execute(snippet, entry))
                .map_err(|e| HarnessError::Setup(format!("failed to start execution thread: {}", e)))?;
            handle.join().unwrap_or_else(|payload| {
                Err(HarnessError::Fault {
                    fault: Fault::Panic(panic_message(payload.as_ref())),
                    output: String::new(),
                })
            })
        });

        info!(
            entry,
            sites = self.coverage.hit_sites(),
            ok = result.is_ok(),
            "snippet finished"
        );
        result
    }

    fn execute(&self, snippet: &str, entry: &str) -> Result<String, HarnessError> {
        let file = parse_file(SNIPPET_FILE, snippet)?;

        let store = Store::new(self.resolver_chain());
        let context = ExecContext::new(self.config.pkg_path.clone());
        let output = OutputBuffer::new();
        debug!(pkg_path = %context.pkg_path, chain_id = %context.chain_id, entry, "harness run");

        let mut machine = Machine::new(&self.config.pkg_path, &store)
            .with_context(context)
            .with_output(output.clone())
            .with_coverage(self.coverage.clone())
            .with_max_call_depth(self.config.max_call_depth)
            .with_max_nesting(self.config.max_nesting);

        let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<Value, MachineError> {
            machine.run_files(std::slice::from_ref(&file))?;
            machine.run_func(entry)
        }));
        machine.release();

        match outcome {
            Ok(Ok(value)) => {
                if !value.is_nil() {
                    let mut sink = output.clone();
                    let _ = write!(sink, "{}", value);
                }
                Ok(output.contents())
            }
            Ok(Err(err)) => Err(classify(err, output.contents())),
            Err(payload) => Err(HarnessError::Fault {
                fault: Fault::Panic(panic_message(payload.as_ref())),
                output: output.contents(),
            }),
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(HarnessConfig::default())
    }
}

fn classify(err: MachineError, output: String) -> HarnessError {
    if let Some((path, fault)) = init_fault(&err) {
        debug!(package = %path, %fault, "dependency faulted during initialisation");
        return HarnessError::Fault {
            fault: fault.clone(),
            output,
        };
    }
    match err {
        MachineError::Fault(fault) => HarnessError::Fault { fault, output },
        MachineError::Unresolved { .. } => HarnessError::Resolution(err.to_string()),
        MachineError::Resolve(ResolveError::Init { ref source, .. })
            if matches!(**source, MachineError::Unresolved { .. }) =>
        {
            HarnessError::Resolution(err.to_string())
        }
        MachineError::Resolve(ref inner) => HarnessError::Resolution(inner.to_string()),
        MachineError::PackageMismatch { .. } | MachineError::Redeclared { .. } => {
            HarnessError::Setup(err.to_string())
        }
    }
}

/// Runtime fault raised by a dependency's declarations, and that package's path
fn init_fault(err: &MachineError) -> Option<(&str, &Fault)> {
    let MachineError::Resolve(ResolveError::Init { path, source }) = err else {
        return None;
    };
    match source.as_ref() {
        MachineError::Fault(fault) => Some((path, fault)),
        nested => init_fault(nested),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Op;
    use crate::store::FixtureResolver;

    fn harness() -> Harness {
        Harness::new(HarnessConfig {
            root_dir: PathBuf::from("/nonexistent-snipcov-root"),
            ..HarnessConfig::default()
        })
    }

    #[test]
    fn test_echo_entry() {
        let h = harness();
        let out = h
            .run("package main\nfunc anomFunc() string { return \"echo:hello world\" }", "anomFunc")
            .unwrap();
        assert_eq!(out, "echo:hello world");
        assert!(!h.dump().is_empty());
        assert_eq!(h.coverage().count(Op::Return.index()), 1);
    }

    #[test]
    fn test_parse_error_leaves_bitmap_empty() {
        let h = harness();
        let err = h.run("package main\nfunc (", "f").unwrap_err();
        assert!(matches!(err, HarnessError::Parse(_)));
        assert!(err.to_string().contains(SNIPPET_FILE));
        assert!(h.dump().is_empty());
    }

    #[test]
    fn test_fault_keeps_partial_output() {
        let h = harness();
        let err = h
            .run("package main\nfunc f() {\n println(\"before\")\n panic(\"bad\")\n}", "f")
            .unwrap_err();
        match err {
            HarnessError::Fault { fault, output } => {
                assert_eq!(fault, Fault::Panic("bad".into()));
                assert_eq!(output, "before\n");
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(h.coverage().count(Op::Panic1.index()), 1);
    }

    #[test]
    fn test_unresolved_import() {
        let h = harness();
        let err = h
            .run("package main\nimport \"nowhere/pkg\"\nfunc f() {}", "f")
            .unwrap_err();
        assert!(matches!(err, HarnessError::Resolution(ref msg) if msg.contains("nowhere/pkg")));
    }

    #[test]
    fn test_reset_between_runs() {
        let h = harness();
        h.run("package main\nfunc f() { for i := 0; i < 10; i++ {} }", "f").unwrap();
        assert_eq!(h.coverage().count(Op::ForLoop.index()), 10);
        h.run("package main\nfunc f() {}", "f").unwrap();
        assert_eq!(h.coverage().count(Op::ForLoop.index()), 0);
    }

    #[test]
    fn test_extra_resolver() {
        let fixture = FixtureResolver::new().with_file(
            "demo/greet",
            "greet.snip",
            "package greet\nfunc Hello(n string) string { return \"hello \" + n }",
        );
        let h = harness().with_resolver(Arc::new(fixture));
        let out = h
            .run(
                "package main\nimport \"demo/greet\"\nfunc f() string { return greet.Hello(\"there\") }",
                "f",
            )
            .unwrap();
        assert_eq!(out, "hello there");
    }

    #[test]
    fn test_dependency_fault_is_a_fault() {
        let fixture = FixtureResolver::new()
            .with_file("demo/bad", "bad.snip", "package bad\nvar Zero = 0\nvar X = 1 / Zero")
            .with_file("demo/wrap", "wrap.snip", "package wrap\nimport \"demo/bad\"\nvar Y = bad.X");
        let h = harness().with_resolver(Arc::new(fixture));
        let err = h
            .run("package main\nimport \"demo/wrap\"\nfunc f() {}", "f")
            .unwrap_err();
        assert!(
            matches!(err, HarnessError::Fault { fault: Fault::DivisionByZero, .. }),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_runaway_recursion_at_default_depth() {
        let h = harness();
        let snippet = "package main
func g(n int) int {
    if n > 0 {
        return g(n-1) + 1
    }
    return 0
}
func f() int { return g(1000) }
func ok() int { return g(60) }";
        let err = h.run(snippet, "f").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Fault { fault: Fault::CallDepthExceeded(crate::machine::DEFAULT_MAX_CALL_DEPTH), .. }
        ));
        assert_eq!(h.run(snippet, "ok").unwrap(), "60");
    }

    #[test]
    fn test_long_expression_runs() {
        let h = harness();
        let snippet = format!(
            "package main\nfunc f() int {{ return {} }}",
            vec!["1"; 250].join(" + ")
        );
        assert_eq!(h.run(&snippet, "f").unwrap(), "250");
    }

    #[test]
    fn test_nesting_fault_is_returned() {
        let h = Harness::new(HarnessConfig {
            max_nesting: 64,
            ..harness().config().clone()
        });
        let snippet = format!("package main\nfunc f() bool {{ return {}true }}", "!".repeat(100));
        let err = h.run(&snippet, "f").unwrap_err();
        assert!(matches!(err, HarnessError::Fault { fault: Fault::NestingExceeded(64), .. }));
    }

    #[test]
    fn test_fmt_output_is_captured() {
        let h = harness();
        let out = h
            .run(
                "package main\nimport \"fmt\"\nfunc f() { fmt.Println(\"x\", 1) }",
                "f",
            )
            .unwrap();
        assert_eq!(out, "x 1\n");
    }
}
