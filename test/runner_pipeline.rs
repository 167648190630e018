//! Runner Pipeline Tests
//!
//! Drive build, warm-up, measured run and export against shell-script
//! stand-ins for cargo, the test binary and the LLVM tools.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use snipcov::runner::{CoverageRunner, LlvmTools, RunnerConfig, RunnerError};

// Scripts are written and run under this lock so no sibling test forks while
// one is still open for writing (ETXTBSY).
static SPAWN: Mutex<()> = Mutex::new(());

const SNIPPET: &str = "package main\nfunc anomFunc() string { return \"echo:hi\" }";

fn script(path: &Path, body: &str) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_path_buf()
}

struct Stubs {
    workdir: PathBuf,
    log: PathBuf,
    cargo: PathBuf,
    tools: LlvmTools,
}

/// Stub toolchain in `root`; `cargo_exit` is the stub cargo's exit status
fn stubs(root: &Path, cargo_exit: i32) -> Stubs {
    let workdir = root.join("work");
    let bin = root.join("stubs");
    let log = root.join("calls.log");
    fs::create_dir_all(&workdir).unwrap();

    let test_binary = script(
        &bin.join("cov_snippet-0123"),
        &format!(
            r#"if [ "$1" = "--list" ]; then echo "list" >> "{log}"; exit 0; fi
echo "run $@" >> "{log}"
printf 'raw' > "$LLVM_PROFILE_FILE""#,
            log = log.display()
        ),
    );
    let cargo = script(
        &bin.join("cargo"),
        &format!(
            r#"echo "cargo $@" >> "{log}"
touch "$(dirname "$LLVM_PROFILE_FILE")/build-4242.profraw"
if [ {exit} -ne 0 ]; then exit {exit}; fi
echo '{{"reason":"compiler-artifact","target":{{"name":"cov_snippet","kind":["test"]}},"executable":"{exe}"}}'
echo '{{"reason":"build-finished","success":true}}'"#,
            log = log.display(),
            exit = cargo_exit,
            exe = test_binary.display()
        ),
    );
    let profdata = script(
        &bin.join("llvm-profdata"),
        &format!(r#"echo "profdata $@" >> "{}"; cp "$3" "$5""#, log.display()),
    );
    let cov = script(
        &bin.join("llvm-cov"),
        &format!(
            r#"echo "cov $1 $2" >> "{log}"
cat <<EOF
SF:{work}/src/machine/exec.rs
DA:10,3
DA:11,0
DA:14,1
end_of_record
SF:{work}/src/machine/exec.rs.orig
DA:2,5
end_of_record
SF:{work}/src/store/mod.rs
DA:5,2
end_of_record
EOF"#,
            log = log.display(),
            work = workdir.display()
        ),
    );

    Stubs {
        workdir,
        log,
        cargo,
        tools: LlvmTools { profdata, cov },
    }
}

fn runner(stubs: &Stubs) -> CoverageRunner {
    CoverageRunner::new(RunnerConfig {
        workdir: stubs.workdir.clone(),
        ..RunnerConfig::default()
    })
    .expect("Failed to create runner")
    .with_cargo(&stubs.cargo)
    .with_tools(stubs.tools.clone())
}

fn calls(stubs: &Stubs) -> Vec<String> {
    fs::read_to_string(&stubs.log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Full round trip
// ============================================================================

#[test]
fn test_coverage_of_runs_every_phase() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let stubs = stubs(tmp.path(), 0);
    let runner = runner(&stubs);

    let report = runner.coverage_of(SNIPPET, "anomFunc").unwrap();
    assert_eq!(report, "src/machine/exec.rs 10 3\nsrc/machine/exec.rs 14 1");

    let calls = calls(&stubs);
    assert_eq!(calls.len(), 5, "{:?}", calls);
    assert!(calls[0].starts_with("cargo test --no-run --message-format=json --test cov_snippet"));
    assert_eq!(calls[1], "list");
    assert_eq!(calls[2], "run --test-threads=4 --nocapture");
    assert!(calls[3].starts_with("profdata merge -sparse"));
    assert_eq!(calls[4], "cov export -format=lcov");

    let profile = fs::read_to_string(runner.profile_path()).unwrap();
    assert!(profile.contains("src/store/mod.rs 5 2"));
}

#[test]
fn test_second_run_reuses_binary() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let stubs = stubs(tmp.path(), 0);
    let runner = runner(&stubs);

    let first = runner.coverage_of(SNIPPET, "anomFunc").unwrap();
    let second = runner.coverage_of(SNIPPET, "anomFunc").unwrap();
    assert_eq!(first, second);

    let builds = calls(&stubs).iter().filter(|c| c.starts_with("cargo ")).count();
    assert_eq!(builds, 1);
}

// ============================================================================
// Build
// ============================================================================

#[test]
fn test_build_copies_binary_and_prunes_old_ones() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let stubs = stubs(tmp.path(), 0);
    let runner = runner(&stubs);

    let stale = runner.binary_path("stale");
    fs::create_dir_all(runner.artifacts_dir()).unwrap();
    fs::write(&stale, b"old").unwrap();

    let binary = runner.ensure_binary("fresh").unwrap();
    assert_eq!(binary, runner.binary_path("fresh"));
    assert!(fs::read_to_string(&binary).unwrap().starts_with("#!/bin/sh"));
    assert!(!stale.exists());
}

#[test]
fn test_build_profiles_are_removed() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let stubs = stubs(tmp.path(), 0);
    let runner = runner(&stubs);

    runner.ensure_binary("fresh").unwrap();
    let leftovers: Vec<_> = fs::read_dir(runner.artifacts_dir())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("build-"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[test]
fn test_failed_build_is_reported_and_cleaned_up() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let stubs = stubs(tmp.path(), 101);
    let runner = runner(&stubs);

    let err = runner.ensure_binary("fresh").unwrap_err();
    assert!(matches!(err, RunnerError::Build(_)));
    assert!(err.to_string().contains("cargo exited with status"));
    assert!(!runner.binary_path("fresh").exists());
    assert!(!runner.artifacts_dir().join("build-profiles").exists());
}

#[test]
fn test_missing_cargo_is_a_build_error() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let runner = CoverageRunner::new(RunnerConfig {
        workdir: tmp.path().to_path_buf(),
        ..RunnerConfig::default()
    })
    .unwrap()
    .with_cargo(tmp.path().join("no-such-cargo"));

    let err = runner.ensure_binary("fresh").unwrap_err();
    assert!(matches!(err, RunnerError::Build(_)));
    assert!(err.to_string().contains("no-such-cargo"));
}

// ============================================================================
// Warm-up and export
// ============================================================================

#[test]
fn test_warm_up_failure_is_ignored() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let stubs = stubs(tmp.path(), 0);
    let runner = runner(&stubs);
    let failing = script(&tmp.path().join("stubs/failing"), "exit 3");

    runner.warm_up(&failing);
    runner.warm_up(&tmp.path().join("missing"));
    assert!(!runner.artifacts_dir().join("warmup.profraw").exists());
}

#[test]
fn test_export_failure_mentions_llvm_version() {
    let _guard = SPAWN.lock();
    let tmp = tempfile::tempdir().unwrap();
    let mut stubs = stubs(tmp.path(), 0);
    stubs.tools.profdata = script(
        &tmp.path().join("stubs/old-profdata"),
        r#"echo "cov.profraw: unsupported instrumentation profile format version" >&2; exit 1"#,
    );
    let runner = runner(&stubs);

    fs::create_dir_all(runner.artifacts_dir()).unwrap();
    let err = runner.export_profile(Path::new("/bin/true")).unwrap_err();
    assert!(matches!(err, RunnerError::Export(_)));
    assert!(err.to_string().contains("may not match the LLVM version of rustc"));
}

// ============================================================================
// Real toolchain
// ============================================================================

#[test]
#[ignore = "builds an instrumented binary; needs llvm-tools-preview"]
fn test_end_to_end_with_real_toolchain() {
    let runner = CoverageRunner::new(RunnerConfig {
        workdir: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
        parallelism: 1,
        ..RunnerConfig::default()
    })
    .unwrap();

    let report = runner
        .coverage_of(
            "package main\nfunc anomFunc() string {\n  x := 0\n  for i := 0; i < 3; i++ { x += i }\n  return \"echo:done\"\n}",
            "anomFunc",
        )
        .unwrap();
    assert!(!report.is_empty());
    assert!(report.lines().all(|l| l.starts_with("src/machine/exec.rs ")));
}
