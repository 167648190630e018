//! snipcov - snippet coverage CLI
//!
//! Runs snippets in-process with an opcode bitmap, or out-of-process with
//! line coverage from an instrumented test binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snipcov::coverage::{diff_dumps, diff_reports};
use snipcov::harness::{Harness, HarnessConfig, HarnessError};
use snipcov::runner::{CoverageRunner, RunnerConfig};
use snipcov::store::{NativeResolver, ResolverChain, Store};
use snipcov::SnipcovConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snipcov")]
#[command(version)]
#[command(about = "Coverage-instrumented snippet execution", long_about = None)]
struct Cli {
    /// Config file (default: snipcov.toml searched upward)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet in-process and print the coverage bitmap
    Run {
        /// Snippet source file
        file: PathBuf,

        /// Entry function
        #[arg(short, long)]
        entry: Option<String>,

        /// Package root directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Package path the snippet runs as
        #[arg(long)]
        pkg_path: Option<String>,

        /// Do not print the bitmap
        #[arg(long)]
        no_bitmap: bool,
    },

    /// Line coverage of a snippet through an instrumented test binary
    Cov {
        /// Snippet source file
        file: PathBuf,

        /// Entry function
        #[arg(short, long)]
        entry: Option<String>,

        /// Source file prefix to report
        #[arg(long)]
        target: Option<String>,

        /// Test threads for the measured run
        #[arg(long)]
        parallel: Option<usize>,
    },

    /// Coverage reached by one snippet and not the other, both ways
    Diff {
        /// First snippet source file
        first: PathBuf,

        /// Second snippet source file
        second: PathBuf,

        /// Entry function
        #[arg(short, long)]
        entry: Option<String>,

        /// Package root directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Compare line coverage from the instrumented test binary
        #[arg(long)]
        lines: bool,

        /// Source file to report with --lines
        #[arg(long)]
        target: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Resolve an import path and list its members
    Resolve {
        /// Import path
        path: String,

        /// Package root directory
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            entry,
            root,
            pkg_path,
            no_bitmap,
        } => cmd_run(&config, &file, entry, root, pkg_path, no_bitmap),
        Commands::Cov {
            file,
            entry,
            target,
            parallel,
        } => cmd_cov(&config, &file, entry, target, parallel),
        Commands::Diff {
            first,
            second,
            entry,
            root,
            lines,
            target,
        } => cmd_diff(&config, &first, &second, entry, root, lines, target),
        Commands::Config => cmd_config(&config),
        Commands::Resolve { path, root } => cmd_resolve(&config, &path, root),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "snipcov=debug",
        _ => "snipcov=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SnipcovConfig> {
    match path {
        Some(path) => SnipcovConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => SnipcovConfig::load_from_cwd().context("Failed to load snipcov.toml"),
    }
}

fn read_snippet(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read snippet {}", file.display()))
}

fn cmd_run(
    config: &SnipcovConfig,
    file: &Path,
    entry: Option<String>,
    root: Option<PathBuf>,
    pkg_path: Option<String>,
    no_bitmap: bool,
) -> Result<()> {
    let snippet = read_snippet(file)?;
    let entry = entry.unwrap_or_else(|| config.harness.entry.clone());

    let mut harness_config = HarnessConfig::from(config.harness.clone());
    if let Some(root) = root {
        harness_config.root_dir = root;
    }
    if let Some(pkg_path) = pkg_path {
        harness_config.pkg_path = pkg_path;
    }

    let harness = Harness::new(harness_config);
    let start = Instant::now();
    let result = harness.run(&snippet, &entry);
    let elapsed = start.elapsed();

    let outcome = match result {
        Ok(output) => {
            print!("{}", output);
            if !output.is_empty() && !output.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Err(err @ HarnessError::Fault { .. }) => {
            print!("{}", err.output());
            Err(anyhow::Error::new(err).context(format!("{} faulted", entry)))
        }
        Err(err) => Err(anyhow::Error::new(err).context(format!("Failed to run {}", file.display()))),
    };

    if !no_bitmap {
        print!("{}", harness.render());
    }
    tracing::debug!(elapsed_us = elapsed.as_micros() as u64, "run complete");
    outcome
}

fn cmd_cov(
    config: &SnipcovConfig,
    file: &Path,
    entry: Option<String>,
    target: Option<String>,
    parallel: Option<usize>,
) -> Result<()> {
    let snippet = read_snippet(file)?;
    let entry = entry.unwrap_or_else(|| config.harness.entry.clone());

    let mut runner_config = RunnerConfig::from(config.runner.clone());
    if let Some(target) = target {
        runner_config.target_file = target;
    }
    if let Some(parallel) = parallel {
        runner_config.parallelism = parallel;
    }

    let runner = CoverageRunner::new(runner_config)?;
    let report = runner
        .coverage_of(&snippet, &entry)
        .context("Coverage run failed")?;
    println!("{}", report);
    Ok(())
}

fn cmd_diff(
    config: &SnipcovConfig,
    first: &Path,
    second: &Path,
    entry: Option<String>,
    root: Option<PathBuf>,
    lines: bool,
    target: Option<String>,
) -> Result<()> {
    let entry = entry.unwrap_or_else(|| config.harness.entry.clone());
    let snippets = [read_snippet(first)?, read_snippet(second)?];
    let labels = [first.display().to_string(), second.display().to_string()];

    if lines {
        let mut runner_config = RunnerConfig::from(config.runner.clone());
        if let Some(target) = target {
            runner_config.target_file = target;
        }
        let runner = CoverageRunner::new(runner_config)?;
        let mut reports = Vec::with_capacity(2);
        for (snippet, label) in snippets.iter().zip(&labels) {
            let report = runner
                .coverage_of(snippet, &entry)
                .with_context(|| format!("Coverage run of {} failed", label))?;
            reports.push(report);
        }
        print!("{}", diff_reports(&reports[0], &reports[1]).render(&labels[0], &labels[1]));
        return Ok(());
    }

    let mut harness_config = HarnessConfig::from(config.harness.clone());
    if let Some(root) = root {
        harness_config.root_dir = root;
    }
    let mut dumps = Vec::with_capacity(2);
    for (snippet, label) in snippets.iter().zip(&labels) {
        // Each snippet gets its own bitmap
        let harness = Harness::new(harness_config.clone());
        if let Err(err) = harness.run(snippet, &entry) {
            eprintln!("{}: {}", label, err);
        }
        dumps.push(harness.dump());
    }
    print!("{}", diff_dumps(&dumps[0], &dumps[1]).render(&labels[0], &labels[1]));
    Ok(())
}

fn cmd_config(config: &SnipcovConfig) -> Result<()> {
    print!("{}", config.to_toml().context("Failed to serialize config")?);
    Ok(())
}

fn cmd_resolve(config: &SnipcovConfig, path: &str, root: Option<PathBuf>) -> Result<()> {
    let root = root.unwrap_or_else(|| config.harness.root_dir.clone());
    let store = Store::new(ResolverChain::new(&root));

    let package = store
        .get_package(path)
        .with_context(|| format!("Failed to resolve {}", path))?;
    let Some(package) = package else {
        anyhow::bail!(
            "package {} not found (native: {}; root: {})",
            path,
            NativeResolver::paths().join(", "),
            root.display()
        );
    };

    let origin = if package.is_native() { "native" } else { "file" };
    println!("{} ({})", path, origin);
    for name in package.member_names() {
        println!("  {}", name);
    }
    Ok(())
}
