//! snipcov - coverage-instrumented snippet execution
//!
//! Runs small Go-flavoured snippets through an embedded interpreter and
//! reports which instrumentation sites they reached. Two measurements are
//! available:
//!
//! - **In-process**: [`Harness::run`] executes a snippet and leaves a
//!   per-opcode hit count in its [`CoverageBitmap`].
//! - **Out-of-process**: [`CoverageRunner::coverage_of`] wraps the snippet in a
//!   generated test, builds it with LLVM instrumentation and returns the
//!   executed lines of one source file.
//!
//! # Example
//!
//! ```rust
//! use snipcov::{Harness, HarnessConfig};
//!
//! let harness = Harness::new(HarnessConfig::default());
//! let output = harness
//!     .run(
//!         r#"package main
//!         func anomFunc() string { return "echo:hello world" }"#,
//!         "anomFunc",
//!     )
//!     .unwrap();
//!
//! assert_eq!(output, "echo:hello world");
//! assert!(!harness.dump().is_empty());
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   parse    ┌─────────┐  imports  ┌───────────────┐
//! │ snippet  │ ─────────▶ │ Machine │ ────────▶ │ Store         │
//! └──────────┘            └────┬────┘           │  native       │
//!                              │ mark(op)       │  file (.snip) │
//!                              ▼                │  extras       │
//!                      ┌────────────────┐       └───────────────┘
//!                      │ CoverageBitmap │
//!                      └────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod coverage;
pub mod harness;
pub mod lang;
pub mod machine;
pub mod runner;
pub mod store;

pub use config::{ConfigError, SnipcovConfig};
pub use coverage::{CoverageBitmap, CoverageDiff, CoverageDump, COVERAGE_BITMAP_SIZE};
pub use harness::{Harness, HarnessConfig, HarnessError, OutputBuffer};
pub use lang::{parse_file, Op, ParseError};
pub use machine::{ExecContext, Fault, Machine, MachineError, Value};
pub use runner::{CoverageRunner, RunnerConfig, RunnerError};
pub use store::{
    FileResolver, FixtureResolver, NativeResolver, Package, ResolveError, Resolver, ResolverChain,
    Store,
};
