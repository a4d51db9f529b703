//! Benchmarks for snapshot creation and diffing.
//!
//! # Run Benchmarks
//!
//! ```bash
//! cargo bench --bench snapshot_ops
//! ```

use aether_core::{PersistenceConfig, StoreHandle};
use aether_snapshots::{DiffFormat, SnapshotStore, diff::render_diff};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::fmt::Write as _;
use std::hint::black_box;
use tempfile::TempDir;

fn plugin_source(lines: usize, variant: usize) -> String {
    let mut source = String::new();
    for i in 0..lines {
        let value = if i % 10 == 0 { i + variant } else { i };
        let _ = writeln!(source, "def handler_{i}(ctx): return ctx.get('key_{value}')");
    }
    source
}

fn bench_create_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_snapshot");

    for lines in [10, 100, 1000] {
        let source = plugin_source(lines, 0);
        group.bench_with_input(BenchmarkId::new("lines", lines), &source, |b, source| {
            let temp = TempDir::new().unwrap();
            let store = SnapshotStore::new(
                StoreHandle::open(PersistenceConfig::with_root(temp.path())).unwrap(),
            );
            b.iter(|| {
                store
                    .create_snapshot("bench", black_box(source), 0.5, "bench", "iteration")
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_render_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_diff");

    for lines in [100, 1000] {
        let old = plugin_source(lines, 0);
        let new = plugin_source(lines, 1);
        for format in [DiffFormat::Unified, DiffFormat::Html] {
            group.bench_with_input(
                BenchmarkId::new(format.to_string(), lines),
                &(&old, &new),
                |b, (old, new)| {
                    b.iter(|| render_diff("a", black_box(old), "b", black_box(new), format));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_create_snapshot, bench_render_diff);
criterion_main!(benches);
