//! CLI Integration Tests for snipcov
//!
//! Runs the built binary against snippet files written to a temp directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn snipcov_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_snipcov"))
}

fn stdlibs() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("stdlibs")
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(snipcov_binary())
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run snipcov")
}

fn write_snippet(dir: &Path, name: &str, source: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, source).expect("Failed to write snippet");
    path.to_string_lossy().into_owned()
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_prints_output_and_bitmap() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_snippet(
        dir.path(),
        "echo.snip",
        "package main\nfunc anomFunc() string { return \"echo:hello world\" }\n",
    );

    let output = run_in(dir.path(), &["run", &file]);
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("echo:hello world\n"), "{}", stdout);
    assert!(stdout.contains("=== Coverage Bitmap ==="));
}

#[test]
fn test_run_with_entry_and_root() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_snippet(
        dir.path(),
        "pad.snip",
        "package main\nimport \"strings\"\nfunc main() { println(strings.PadLeft(\"7\", 3, \"0\")) }\n",
    );
    let root = stdlibs();

    let output = run_in(
        dir.path(),
        &["run", &file, "--entry", "main", "--root", root.to_str().unwrap(), "--no-bitmap"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "007\n");
}

#[test]
fn test_run_fault_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_snippet(
        dir.path(),
        "boom.snip",
        "package main\nfunc anomFunc() { println(\"partial\"); panic(\"boom\") }\n",
    );

    let output = run_in(dir.path(), &["run", &file, "--no-bitmap"]);
    assert!(!output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "partial\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("panic: boom"));
}

#[test]
fn test_run_reads_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("snipcov.toml"), "[harness]\nentry = \"start\"\n").unwrap();
    let file = write_snippet(
        dir.path(),
        "start.snip",
        "package main\nfunc start() string { return \"configured\" }\n",
    );

    let output = run_in(dir.path(), &["run", &file, "--no-bitmap"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "configured\n");
}

// ============================================================================
// resolve
// ============================================================================

#[test]
fn test_resolve_native_package() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["resolve", "fmt"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("fmt (native)"));
    assert!(stdout.contains("  Println"));
}

#[test]
fn test_resolve_disk_package() {
    let dir = tempfile::tempdir().unwrap();
    let root = stdlibs();
    let output = run_in(dir.path(), &["resolve", "math", "--root", root.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("math (file)"));
    assert!(stdout.contains("  Gcd"));
}

#[test]
fn test_resolve_unknown_package() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["resolve", "does/not/exist"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

// ============================================================================
// diff
// ============================================================================

#[test]
fn test_diff_reports_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_snippet(
        dir.path(),
        "branch.snip",
        "package main\nfunc anomFunc() string {\n  if 1 < 2 { return \"a\" }\n  return \"b\"\n}\n",
    );
    let second = write_snippet(
        dir.path(),
        "loop.snip",
        "package main\nfunc anomFunc() string {\n  for i := 0; i < 2; i++ {}\n  return \"b\"\n}\n",
    );

    let output = run_in(dir.path(), &["diff", &first, &second]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let (only_first, only_second) = stdout
        .split_once(&format!("In {} but not in {}:", second, first))
        .expect("missing second section");
    assert!(only_first.starts_with(&format!("In {} but not in {}:", first, second)));
    assert!(only_first.contains("(OpIfCond)"));
    assert!(!only_first.contains("(OpForLoop)"));
    assert!(only_second.contains("(OpForLoop)"));
    assert!(!only_second.contains("(OpCall)"));
}

#[test]
fn test_diff_of_identical_snippets_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let source = "package main\nfunc anomFunc() string { return \"same\" }\n";
    let first = write_snippet(dir.path(), "a.snip", source);
    let second = write_snippet(dir.path(), "b.snip", source);

    let output = run_in(dir.path(), &["diff", &first, &second]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!(
            "In {a} but not in {b}:\nIn {b} but not in {a}:\n",
            a = first,
            b = second
        )
    );
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_prints_effective_settings() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("snipcov.toml"), "[runner]\nparallelism = 2\n").unwrap();

    let output = run_in(dir.path(), &["config"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("parallelism = 2"));
    assert!(stdout.contains("entry = \"anomFunc\""));
    assert!(stdout.contains("max_call_depth = 64"));
}
