//! Benchmarks for coverage marking and snippet execution

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use snipcov::coverage::CoverageBitmap;
use snipcov::harness::{Harness, HarnessConfig};
use snipcov::Op;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Benchmark single-threaded marking
fn bench_mark(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap_mark");
    let bitmap = CoverageBitmap::new();

    group.throughput(Throughput::Elements(1));
    group.bench_function("in_range", |b| b.iter(|| bitmap.mark(black_box(Op::Call.index()))));
    group.bench_function("out_of_range", |b| b.iter(|| bitmap.mark(black_box(1 << 20))));
    group.finish();
}

/// Benchmark marking from several threads at once
fn bench_contended_mark(c: &mut Criterion) {
    let bitmap = Arc::new(CoverageBitmap::new());

    c.bench_function("bitmap_mark_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let bitmap = Arc::clone(&bitmap);
                    thread::spawn(move || {
                        for i in 0..1000 {
                            bitmap.mark(i % 64);
                        }
                    })
                })
                .collect();
            for handle in handles {
                let _ = handle.join();
            }
        })
    });
}

/// Benchmark dump and reset
fn bench_snapshot(c: &mut Criterion) {
    let bitmap = CoverageBitmap::new();
    for i in (0..65536).step_by(97) {
        bitmap.mark(i);
    }

    c.bench_function("bitmap_dump", |b| b.iter(|| black_box(bitmap.dump())));
    c.bench_function("bitmap_reset", |b| b.iter(|| bitmap.reset()));
}

/// Benchmark a full harness run
fn bench_harness(c: &mut Criterion) {
    let harness = Harness::new(HarnessConfig {
        root_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("stdlibs"),
        ..HarnessConfig::default()
    });
    let snippet = r#"package main

func fib(n int) int {
	if n < 2 {
		return n
	}
	return fib(n-1) + fib(n-2)
}

func anomFunc() string {
	return string(fib(15))
}
"#;

    c.bench_function("harness_fib_15", |b| {
        b.iter(|| black_box(harness.run(snippet, "anomFunc")))
    });
}

criterion_group!(
    benches,
    bench_mark,
    bench_contended_mark,
    bench_snapshot,
    bench_harness
);
criterion_main!(benches);
