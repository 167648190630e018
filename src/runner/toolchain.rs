//! Locating build outputs and LLVM coverage tools

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, warn};

use super::RunnerError;

/// One line of `cargo --message-format=json`
#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    #[serde(default)]
    target: Option<CargoTarget>,
    #[serde(default)]
    executable: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CargoTarget {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
}

/// Executable built for the `test_name` test target, from cargo's JSON output
pub fn find_test_executable(messages: &str, test_name: &str) -> Option<PathBuf> {
    messages
        .lines()
        .filter_map(|line| serde_json::from_str::<CargoMessage>(line).ok())
        .filter(|msg| msg.reason == "compiler-artifact")
        .filter(|msg| {
            msg.target
                .as_ref()
                .is_some_and(|t| t.name == test_name && t.kind.iter().any(|k| k == "test"))
        })
        .filter_map(|msg| msg.executable)
        .last()
}

/// `llvm-profdata` and `llvm-cov`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlvmTools {
    pub profdata: PathBuf,
    pub cov: PathBuf,
}

impl LlvmTools {
    /// Prefer the active rustc sysroot, whose tools match the LLVM version
    /// that wrote the profile; fall back to `PATH`
    pub fn discover() -> Result<Self, RunnerError> {
        let sysroot_bin = match sysroot_tool_dir() {
            Ok(dir) => Some(dir),
            Err(e) => {
                debug!(error = %e, "rustc sysroot unavailable");
                None
            }
        };
        Ok(Self {
            profdata: find_tool("llvm-profdata", sysroot_bin.as_deref())?,
            cov: find_tool("llvm-cov", sysroot_bin.as_deref())?,
        })
    }
}

fn find_tool(name: &str, sysroot_bin: Option<&Path>) -> Result<PathBuf, RunnerError> {
    let cwd = std::env::current_dir().unwrap_or_default();
    locate(name, sysroot_bin, std::env::var_os("PATH"), &cwd).ok_or_else(|| {
        let searched = sysroot_bin
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "the rustc sysroot".to_string());
        RunnerError::Tool(format!(
            "{} not found in {} or on PATH (install llvm-tools-preview; \
             a PATH copy must match the LLVM version of rustc)",
            name, searched
        ))
    })
}

fn locate(
    name: &str,
    sysroot_bin: Option<&Path>,
    search_path: Option<OsString>,
    cwd: &Path,
) -> Option<PathBuf> {
    if let Some(dir) = sysroot_bin {
        let candidate = dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX));
        if candidate.is_file() {
            debug!(tool = name, path = %candidate.display(), "found in sysroot");
            return Some(candidate);
        }
    }
    let path = which::which_in(name, search_path, cwd).ok()?;
    warn!(
        tool = name,
        path = %path.display(),
        "using coverage tool from PATH; its LLVM version may differ from rustc's"
    );
    Some(path)
}

/// `<sysroot>/lib/rustlib/<host>/bin`
fn sysroot_tool_dir() -> Result<PathBuf, RunnerError> {
    let sysroot = rustc_output(&["--print", "sysroot"])?;
    let version = rustc_output(&["-vV"])?;
    let host = parse_host(&version)
        .ok_or_else(|| RunnerError::Tool("rustc -vV did not report a host triple".to_string()))?;
    Ok(tool_dir(Path::new(sysroot.trim()), host))
}

fn tool_dir(sysroot: &Path, host: &str) -> PathBuf {
    sysroot.join("lib").join("rustlib").join(host).join("bin")
}

fn parse_host(version: &str) -> Option<&str> {
    version
        .lines()
        .find_map(|line| line.strip_prefix("host: "))
        .map(str::trim)
}

fn rustc_output(args: &[&str]) -> Result<String, RunnerError> {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let output = Command::new(&rustc)
        .args(args)
        .output()
        .map_err(|e| RunnerError::Tool(format!("failed to execute {}: {}", rustc, e)))?;
    if !output.status.success() {
        return Err(RunnerError::Tool(format!(
            "{} {} failed with status: {}",
            rustc,
            args.join(" "),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
