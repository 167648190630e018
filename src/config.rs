//! snipcov Project Configuration
//!
//! Handles parsing of snipcov.toml configuration files. Every field has a
//! default, so an absent file or an empty table is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::machine::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_NESTING};

/// File name searched for by [`SnipcovConfig::find_and_load`]
pub const CONFIG_FILE: &str = "snipcov.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching snipcov.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SnipcovConfig {
    /// In-process harness settings
    #[serde(default)]
    pub harness: HarnessSection,

    /// Out-of-process runner settings
    #[serde(default)]
    pub runner: RunnerSection,
}

impl SnipcovConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: SnipcovConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize to a TOML document that [`SnipcovConfig::load`] reads back
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "loading config");
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }
}

/// `[harness]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessSection {
    /// Root directory of on-disk packages
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Package path snippets run as
    #[serde(default = "default_pkg_path")]
    pub pkg_path: String,

    /// Entry function name used when none is given
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Maximum nested snippet calls
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Maximum statement/expression nesting
    #[serde(default = "default_max_nesting")]
    pub max_nesting: usize,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("stdlibs")
}

fn default_pkg_path() -> String {
    "main".to_string()
}

fn default_entry() -> String {
    "anomFunc".to_string()
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

fn default_max_nesting() -> usize {
    DEFAULT_MAX_NESTING
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            pkg_path: default_pkg_path(),
            entry: default_entry(),
            max_call_depth: default_max_call_depth(),
            max_nesting: default_max_nesting(),
        }
    }
}

/// `[runner]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerSection {
    /// Cargo project the wrapper test is built in
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Generated wrapper file, relative to `workdir`
    #[serde(default = "default_wrapper_path")]
    pub wrapper_path: PathBuf,

    /// Test target name passed to `cargo test --test`
    #[serde(default = "default_test_name")]
    pub test_name: String,

    /// Cached binaries, build output and raw profiles
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Line profile written after each measured run
    #[serde(default = "default_profile_path")]
    pub profile_path: PathBuf,

    /// `--test-threads` for the measured run
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Source file the report is filtered to
    #[serde(default = "default_target_file")]
    pub target_file: String,

    /// Extra `-p` packages for the build
    #[serde(default)]
    pub packages: Vec<String>,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_wrapper_path() -> PathBuf {
    PathBuf::from("tests/cov_snippet.rs")
}

fn default_test_name() -> String {
    "cov_snippet".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("target/snipcov")
}

fn default_profile_path() -> PathBuf {
    PathBuf::from("coverage.out")
}

fn default_parallelism() -> usize {
    4
}

fn default_target_file() -> String {
    "src/machine/exec.rs".to_string()
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            wrapper_path: default_wrapper_path(),
            test_name: default_test_name(),
            artifacts_dir: default_artifacts_dir(),
            profile_path: default_profile_path(),
            parallelism: default_parallelism(),
            target_file: default_target_file(),
            packages: Vec::new(),
        }
    }
}
