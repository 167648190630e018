//! Out-of-process coverage runner
//!
//! Produces line-level coverage for a snippet by compiling a wrapper test with
//! `-C instrument-coverage`, running it, and exporting the LLVM profile.
//!
//! ```text
//! coverage_of(snippet, entry)
//!   generate_wrapper   tests/cov_snippet.rs (written only when changed)
//!   ensure_binary      <artifacts>/testbinary-<hash>, built on cache miss
//!   warm_up            <binary> --list, scratch profile discarded
//!   run_measured       <binary> --test-threads=N --nocapture
//!   export_profile     llvm-profdata merge + llvm-cov export -> profile_path
//!   extract            nonzero records of target_file
//! ```
//!
//! Artifacts live at fixed paths under the configured directories; two
//! runners sharing a work directory must not run at the same time.

pub mod profile;
pub mod template;
pub mod toolchain;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RunnerSection;
pub use profile::{
    escape_path, extract, filter_nonzero, filter_target, lcov_to_profile, PROFILE_HEADER,
};
pub use template::{content_hash, render_wrapper, write_if_changed};
pub use toolchain::LlvmTools;

/// Prefix of cached test binaries in the artifacts directory
pub const BINARY_PREFIX: &str = "testbinary-";

/// Runner failure
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to build test binary: {0}")]
    Build(String),

    #[error("failed to run test binary: {0}")]
    Run(String),

    #[error("failed to locate coverage tool: {0}")]
    Tool(String),

    #[error("failed to export coverage profile: {0}")]
    Export(String),

    #[error("failed to read coverage profile {}: {source}", .path.display())]
    ReadProfile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_context(context: impl Into<String>) -> impl FnOnce(io::Error) -> RunnerError {
    let context = context.into();
    move |source| RunnerError::Io { context, source }
}

/// Runner settings; relative paths are resolved against `workdir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub workdir: PathBuf,
    pub wrapper_path: PathBuf,
    pub test_name: String,
    pub artifacts_dir: PathBuf,
    pub profile_path: PathBuf,
    pub parallelism: usize,
    pub target_file: String,
    pub packages: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerSection::default().into()
    }
}

impl From<RunnerSection> for RunnerConfig {
    fn from(section: RunnerSection) -> Self {
        Self {
            workdir: section.workdir,
            wrapper_path: section.wrapper_path,
            test_name: section.test_name,
            artifacts_dir: section.artifacts_dir,
            profile_path: section.profile_path,
            parallelism: section.parallelism,
            target_file: section.target_file,
            packages: section.packages,
        }
    }
}

/// Drives one wrapper/binary/profile round trip at a time
#[derive(Debug, Clone)]
pub struct CoverageRunner {
    config: RunnerConfig,
    workdir: PathBuf,
    /// Cargo executable (`$CARGO`, else `cargo`)
    cargo: PathBuf,
    /// Coverage tools; discovered on first export when unset
    tools: Option<LlvmTools>,
}

impl CoverageRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        let workdir = if config.workdir.is_absolute() {
            config.workdir.clone()
        } else {
            std::env::current_dir()
                .map_err(io_context("failed to read current directory"))?
                .join(&config.workdir)
        };
        let cargo = std::env::var_os("CARGO")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cargo"));
        Ok(Self {
            config,
            workdir,
            cargo,
            tools: None,
        })
    }

    /// Build with a specific cargo executable
    pub fn with_cargo(mut self, cargo: impl Into<PathBuf>) -> Self {
        self.cargo = cargo.into();
        self
    }

    /// Use these coverage tools instead of discovering them
    pub fn with_tools(mut self, tools: LlvmTools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn path(&self, relative: &Path) -> PathBuf {
        self.workdir.join(relative)
    }

    pub fn wrapper_path(&self) -> PathBuf {
        self.path(&self.config.wrapper_path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.path(&self.config.artifacts_dir)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.path(&self.config.profile_path)
    }

    /// Cached binary for a wrapper with the given content hash
    pub fn binary_path(&self, hash: &str) -> PathBuf {
        self.artifacts_dir().join(format!("{}{}", BINARY_PREFIX, hash))
    }

    fn raw_profile(&self) -> PathBuf {
        self.artifacts_dir().join("cov.profraw")
    }

    /// Profiles written by instrumented build scripts and proc macros
    fn build_profiles_dir(&self) -> PathBuf {
        self.artifacts_dir().join("build-profiles")
    }

    /// Full round trip; returns executed lines of the target file
    pub fn coverage_of(&self, snippet: &str, entry: &str) -> Result<String, RunnerError> {
        let total = Instant::now();

        let hash = timed("generate wrapper", || self.generate_wrapper(snippet, entry))?;
        let binary = timed("build", || self.ensure_binary(&hash))?;
        timed("warm up", || {
            self.warm_up(&binary);
            Ok(())
        })?;
        timed("measured run", || self.run_measured(&binary))?;
        timed("export profile", || self.export_profile(&binary))?;

        let profile_path = self.profile_path();
        let text = fs::read_to_string(&profile_path).map_err(|source| RunnerError::ReadProfile {
            path: profile_path.clone(),
            source,
        })?;
        let report = extract(&text, &self.config.target_file);

        info!(
            target_file = %self.config.target_file,
            lines = report.lines().count(),
            elapsed_ms = total.elapsed().as_millis() as u64,
            "coverage run finished"
        );
        Ok(report)
    }

    /// Write the wrapper test if its content changed; returns its content hash
    pub fn generate_wrapper(&self, snippet: &str, entry: &str) -> Result<String, RunnerError> {
        let source = render_wrapper(snippet, entry);
        let path = self.wrapper_path();
        let written = write_if_changed(&path, &source)
            .map_err(io_context(format!("failed to write {}", path.display())))?;
        debug!(path = %path.display(), written, "wrapper generated");
        Ok(content_hash(&source))
    }

    /// The test binary for `hash`, building it only if it is not cached
    pub fn ensure_binary(&self, hash: &str) -> Result<PathBuf, RunnerError> {
        let binary = self.binary_path(hash);
        if binary.is_file() {
            debug!(binary = %binary.display(), "reusing cached test binary");
            return Ok(binary);
        }

        let artifacts = self.artifacts_dir();
        fs::create_dir_all(&artifacts)
            .map_err(io_context(format!("failed to create {}", artifacts.display())))?;

        let built = self.build()?;
        fs::copy(&built, &binary).map_err(io_context(format!(
            "failed to copy {} to {}",
            built.display(),
            binary.display()
        )))?;
        self.prune_binaries(&binary);
        Ok(binary)
    }

    fn build(&self) -> Result<PathBuf, RunnerError> {
        let scratch = self.build_profiles_dir();
        fs::create_dir_all(&scratch)
            .map_err(io_context(format!("failed to create {}", scratch.display())))?;
        let result = self.run_cargo_build(&scratch);
        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!(path = %scratch.display(), error = %e, "failed to remove build profiles");
        }
        result
    }

    fn run_cargo_build(&self, scratch: &Path) -> Result<PathBuf, RunnerError> {
        let rustflags = match std::env::var("RUSTFLAGS") {
            Ok(existing) if !existing.trim().is_empty() => {
                format!("{} -C instrument-coverage", existing)
            }
            _ => "-C instrument-coverage".to_string(),
        };

        let mut cmd = Command::new(&self.cargo);
        cmd.current_dir(&self.workdir)
            .args(["test", "--no-run", "--message-format=json", "--test"])
            .arg(&self.config.test_name);
        for package in &self.config.packages {
            cmd.args(["-p", package]);
        }
        cmd.env("RUSTFLAGS", rustflags)
            .env("CARGO_TARGET_DIR", self.artifacts_dir().join("target"))
            .env("LLVM_PROFILE_FILE", scratch.join("build-%p.profraw"))
            .stderr(Stdio::inherit());

        debug!(cmd = ?cmd, "building instrumented test binary");
        let output = cmd.output().map_err(|e| {
            RunnerError::Build(format!("failed to execute {}: {}", self.cargo.display(), e))
        })?;
        if !output.status.success() {
            return Err(RunnerError::Build(format!(
                "cargo exited with status: {}",
                output.status
            )));
        }

        let messages = String::from_utf8_lossy(&output.stdout);
        toolchain::find_test_executable(&messages, &self.config.test_name).ok_or_else(|| {
            RunnerError::Build(format!(
                "cargo produced no executable for test target {}",
                self.config.test_name
            ))
        })
    }

    /// Remove cached binaries other than `keep`
    fn prune_binaries(&self, keep: &Path) {
        let Ok(entries) = fs::read_dir(self.artifacts_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = path != keep
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(BINARY_PREFIX));
            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "pruned stale test binary"),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to prune test binary"),
                }
            }
        }
    }

    /// Discardable `--list` invocation; failures are logged and ignored
    pub fn warm_up(&self, binary: &Path) {
        let scratch = self.artifacts_dir().join("warmup.profraw");
        let status = Command::new(binary)
            .arg("--list")
            .current_dir(&self.workdir)
            .env("LLVM_PROFILE_FILE", &scratch)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(%status, "warm-up run failed"),
            Err(e) => warn!(error = %e, "warm-up run could not start"),
        }
        let _ = fs::remove_file(&scratch);
    }

    /// Measured run with the raw profile written to the artifacts directory
    pub fn run_measured(&self, binary: &Path) -> Result<(), RunnerError> {
        let raw = self.raw_profile();
        let _ = fs::remove_file(&raw);

        let status = Command::new(binary)
            .arg(format!("--test-threads={}", self.config.parallelism.max(1)))
            .arg("--nocapture")
            .current_dir(&self.workdir)
            .env("LLVM_PROFILE_FILE", &raw)
            .status()
            .map_err(|e| RunnerError::Run(format!("failed to execute {}: {}", binary.display(), e)))?;
        if !status.success() {
            return Err(RunnerError::Run(format!(
                "{} exited with status: {}",
                binary.display(),
                status
            )));
        }
        Ok(())
    }

    /// Merge the raw profile and write the line profile to `profile_path`
    pub fn export_profile(&self, binary: &Path) -> Result<(), RunnerError> {
        let tools = match self.tools {
            Some(ref tools) => tools.clone(),
            None => LlvmTools::discover()?,
        };
        let raw = self.raw_profile();
        let indexed = self.artifacts_dir().join("cov.profdata");

        let merge = Command::new(&tools.profdata)
            .args(["merge", "-sparse"])
            .arg(&raw)
            .arg("-o")
            .arg(&indexed)
            .output()
            .map_err(|e| RunnerError::Export(format!("failed to execute llvm-profdata: {}", e)))?;
        if !merge.status.success() {
            return Err(RunnerError::Export(format!(
                "llvm-profdata merge failed: {}{}",
                String::from_utf8_lossy(&merge.stderr).trim(),
                version_hint(&tools.profdata, &merge.stderr)
            )));
        }

        let export = Command::new(&tools.cov)
            .args(["export", "-format=lcov"])
            .arg(format!("-instr-profile={}", indexed.display()))
            .arg(binary)
            .output()
            .map_err(|e| RunnerError::Export(format!("failed to execute llvm-cov: {}", e)))?;
        if !export.status.success() {
            return Err(RunnerError::Export(format!(
                "llvm-cov export failed: {}{}",
                String::from_utf8_lossy(&export.stderr).trim(),
                version_hint(&tools.cov, &export.stderr)
            )));
        }

        let lcov = String::from_utf8_lossy(&export.stdout);
        let profile = lcov_to_profile(&lcov, &self.workdir);
        let path = self.profile_path();
        fs::write(&path, profile).map_err(io_context(format!("failed to write {}", path.display())))?;
        Ok(())
    }
}

/// Extra advice when an LLVM tool rejects the profile's format version
fn version_hint(tool: &Path, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    if stderr.contains("version") || stderr.contains("unsupported") {
        format!(
            " ({} may not match the LLVM version of rustc; install llvm-tools-preview)",
            tool.display()
        )
    } else {
        String::new()
    }
}

fn timed<T>(phase: &str, f: impl FnOnce() -> Result<T, RunnerError>) -> Result<T, RunnerError> {
    let start = Instant::now();
    let result = f();
    info!(
        phase,
        ok = result.is_ok(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "runner phase"
    );
    result
}
