//! Runner Profile Tests
//!
//! Wrapper generation, binary caching and profile filtering. None of these
//! invoke cargo or the LLVM tools.

use std::fs;
use std::path::Path;

use snipcov::runner::{
    extract, filter_nonzero, filter_target, lcov_to_profile, render_wrapper, CoverageRunner,
    RunnerConfig, RunnerError, PROFILE_HEADER,
};

fn runner_in(dir: &Path) -> CoverageRunner {
    CoverageRunner::new(RunnerConfig {
        workdir: dir.to_path_buf(),
        ..RunnerConfig::default()
    })
    .expect("Failed to create runner")
}

// ============================================================================
// Wrapper generation
// ============================================================================

#[test]
fn test_generation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path());
    let snippet = "package main\nfunc anomFunc() string { return \"echo:hello world\" }";

    runner.generate_wrapper(snippet, "anomFunc").unwrap();
    let path = runner.wrapper_path();
    let first = fs::metadata(&path).unwrap().modified().unwrap();
    let content = fs::read_to_string(&path).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    runner.generate_wrapper(snippet, "anomFunc").unwrap();
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), first);
    assert_eq!(fs::read_to_string(&path).unwrap(), content);

    runner.generate_wrapper("package main\nfunc anomFunc() {}", "anomFunc").unwrap();
    assert_ne!(fs::read_to_string(&path).unwrap(), content);
}

#[test]
fn test_wrapper_survives_hostile_snippet() {
    let snippet = "package main\nfunc f() string { return \"\"# + \"##\" }";
    let source = render_wrapper(snippet, "f");
    assert!(source.contains("r###\""));
    assert!(source.contains(snippet));
}

#[test]
fn test_cache_key_changes_binary_path() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path());
    let a = runner.generate_wrapper("package main\nfunc f() {}", "f").unwrap();
    let b = runner.generate_wrapper("package main\nfunc g() {}", "g").unwrap();
    assert_ne!(runner.binary_path(&a), runner.binary_path(&b));
}

// ============================================================================
// Profile filtering
// ============================================================================

const PROFILE: &str = "mode: count
src/machine/exec.rs 10 3
src/machine/eval.rs 11 4
src/machine/exec.rs 12 0
src/machine/exec.rs.bak 13 1

src/machine/exec.rs 14 1
src/store/mod.rs 1 9
";

#[test]
fn test_filtering_keeps_nonzero_target_lines_in_order() {
    assert_eq!(
        extract(PROFILE, "src/machine/exec.rs"),
        "src/machine/exec.rs 10 3\nsrc/machine/exec.rs 14 1"
    );
}

#[test]
fn test_filter_steps() {
    let lines: Vec<&str> = PROFILE.lines().collect();
    let nonzero = filter_nonzero(&lines);
    assert_eq!(nonzero.len(), 5);
    assert!(nonzero.iter().all(|l| !l.ends_with(" 0")));
    assert_eq!(filter_target(&nonzero, "src/store/").len(), 1);
    assert!(filter_target(&nonzero, "src/store").is_empty());
    assert_eq!(filter_target(&nonzero, "src/machine/").len(), 4);
}

#[test]
fn test_lcov_to_filtered_report() {
    let lcov = "SF:/repo/src/harness.rs\nDA:5,1\nDA:6,0\nend_of_record\nSF:/repo/src/lib.rs\nDA:1,2\nend_of_record\n";
    let profile = lcov_to_profile(lcov, Path::new("/repo"));
    assert!(profile.starts_with(PROFILE_HEADER));
    assert_eq!(extract(&profile, "src/harness.rs"), "src/harness.rs 5 1");
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_unreadable_profile_is_reported() {
    let err = RunnerError::ReadProfile {
        path: "coverage.out".into(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
    };
    assert_eq!(err.to_string(), "failed to read coverage profile coverage.out: missing");
}

#[test]
fn test_measured_run_of_missing_binary_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path());
    let err = runner
        .run_measured(&dir.path().join("no-such-binary"))
        .unwrap_err();
    assert!(matches!(err, RunnerError::Run(_)));
    assert!(err.to_string().starts_with("failed to run test binary"));
}
