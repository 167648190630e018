//! Harness Execution Tests
//!
//! Runs snippets end to end through the harness, against the packages shipped
//! under stdlibs/, and checks both output and bitmap state.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use snipcov::coverage::{CoverageBitmap, COVERAGE_BITMAP_SIZE};
use snipcov::harness::{Harness, HarnessConfig, HarnessError};
use snipcov::{Fault, Op};

fn stdlibs() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("stdlibs")
}

fn harness() -> Harness {
    Harness::new(HarnessConfig {
        root_dir: stdlibs(),
        ..HarnessConfig::default()
    })
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn test_echo_hello_world() {
    let h = harness();
    let snippet = r#"package main

func anomFunc() string {
	return "echo:hello world"
}
"#;
    let output = h.run(snippet, "anomFunc").expect("snippet failed");
    assert_eq!(output, "echo:hello world");

    let dump = h.dump();
    assert!(!dump.is_empty(), "bitmap should have nonzero sites");
    assert!(dump.values().all(|&count| count > 0));
    assert!(h.render().starts_with("=== Coverage Bitmap ===\n"));
}

#[test]
fn test_stdlib_strings_and_math() {
    let h = harness();
    let snippet = r#"package main

import (
	"math"
	"strings"
)

func anomFunc() string {
	parts := strings.Split("a,b,c", ",")
	joined := strings.Join(parts, "-")
	padded := strings.PadLeft(string(math.Gcd(12, 18)), 3, "0")
	return joined + " " + padded + " " + strings.Reverse("abc") + " " + string(math.Fib(10))
}
"#;
    assert_eq!(h.run(snippet, "anomFunc").unwrap(), "a-b-c 006 cba 55");
}

#[test]
fn test_aliased_import_and_json() {
    let h = harness();
    let snippet = r#"package main

import (
	"fmt"
	js "encoding/json"
)

func anomFunc() {
	doc := js.Unmarshal(`{"n": 3, "tags": ["x", "y"]}`)
	doc["n"] += 1
	fmt.Println(js.Marshal(doc))
}
"#;
    assert_eq!(h.run(snippet, "anomFunc").unwrap(), "{\"n\":4,\"tags\":[\"x\",\"y\"]}\n");
}

#[test]
fn test_package_state_is_read_only() {
    let h = harness();
    let snippet = "package main\nimport \"math\"\nfunc f() { math.MaxInt = 1 }";
    let err = h.run(snippet, "f").unwrap_err();
    assert!(matches!(err, HarnessError::Fault { fault: Fault::ReadOnly(_), .. }), "{:?}", err);
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_fault_is_returned_not_raised() {
    let h = harness();
    let snippet = r#"package main

func anomFunc() {
	defer println("cleanup")
	xs := []int{1, 2}
	println(xs[5])
}
"#;
    match h.run(snippet, "anomFunc") {
        Err(HarnessError::Fault { fault, output }) => {
            assert_eq!(fault, Fault::IndexOutOfRange { index: 5, len: 2 });
            assert_eq!(output, "cleanup\n");
        }
        other => panic!("expected a fault, got {:?}", other),
    }
    assert_eq!(h.coverage().count(Op::Panic2.index()), 1);
}

#[test]
fn test_missing_entry() {
    let h = harness();
    let err = h.run("package main\nfunc f() {}", "anomFunc").unwrap_err();
    assert!(matches!(err, HarnessError::Fault { fault: Fault::Undefined(_), .. }), "{:?}", err);
}

#[test]
fn test_runaway_recursion_is_bounded() {
    let h = Harness::new(HarnessConfig {
        root_dir: stdlibs(),
        max_call_depth: 32,
        ..HarnessConfig::default()
    });
    let err = h.run("package main\nfunc f() { f() }", "f").unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fault { fault: Fault::CallDepthExceeded(32), .. }
    ));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_separate_harnesses_do_not_interfere() {
    let loops = |n: usize| format!("package main\nfunc f() {{ for i := 0; i < {}; i++ {{}} }}", n);

    let handles: Vec<_> = [3usize, 7, 11]
        .into_iter()
        .map(|n| {
            let snippet = loops(n);
            thread::spawn(move || {
                let h = harness();
                for _ in 0..20 {
                    h.run(&snippet, "f").unwrap();
                }
                (n, h.coverage().count(Op::ForLoop.index()))
            })
        })
        .collect();

    for handle in handles {
        let (n, count) = handle.join().unwrap();
        assert_eq!(count as usize, n);
    }
}

#[test]
fn test_shared_harness_runs_are_serialised() {
    let h = Arc::new(harness());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                h.run("package main\nfunc f() string { return \"ok\" }", "f").unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), "ok");
    }
    assert_eq!(h.coverage().count(Op::Return.index()), 1);
}

// ============================================================================
// Bitmap properties
// ============================================================================

proptest! {
    #[test]
    fn prop_mark_counts(index in 0usize..COVERAGE_BITMAP_SIZE, k in 0u32..50) {
        let bitmap = CoverageBitmap::new();
        for _ in 0..k {
            bitmap.mark(index);
        }
        prop_assert_eq!(bitmap.dump().get(&index).copied().unwrap_or(0), k);
    }

    #[test]
    fn prop_out_of_range_is_ignored(offset in 0usize..1_000_000) {
        let bitmap = CoverageBitmap::new();
        bitmap.mark(7);
        bitmap.mark(COVERAGE_BITMAP_SIZE + offset);
        let dump = bitmap.dump();
        prop_assert_eq!(dump.len(), 1);
        prop_assert_eq!(dump.get(&7).copied(), Some(1));
    }

    #[test]
    fn prop_reset_empties(indices in proptest::collection::vec(0usize..COVERAGE_BITMAP_SIZE, 0..64)) {
        let bitmap = CoverageBitmap::new();
        for i in &indices {
            bitmap.mark(*i);
        }
        bitmap.reset();
        prop_assert!(bitmap.dump().is_empty());
    }
}
