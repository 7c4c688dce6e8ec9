//! Performance benchmarks for the version store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refstore::{
    CommitId, CommitMeta, ContentKey, DiffOptions, MergeOptions, Operation, RefTarget,
    ReferenceKind, StoreConfig, VersionStore,
};
use tempfile::TempDir;

fn create_store(checkpoint_interval: u64) -> VersionStore {
    VersionStore::in_memory(StoreConfig {
        checkpoint_interval,
        ..Default::default()
    })
    .unwrap()
}

/// Linear history of `depth` commits, each touching one of `keys` keys.
fn build_chain(store: &VersionStore, depth: usize, keys: usize) -> CommitId {
    let mut head = store.get_reference("main").unwrap().head;
    for i in 0..depth {
        let key = format!("db.t{}", i % keys);
        head = store
            .commit(
                "main",
                head,
                vec![Operation::put(key.as_str(), format!("{{\"v\":{}}}", i).into_bytes())],
                CommitMeta::new("bench", "c"),
            )
            .unwrap();
    }
    head
}

/// Cold snapshot resolution with varying history depths
fn bench_snapshot_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_resolution");

    for depth in [10, 100, 500, 1000] {
        for (label, interval) in [("no_checkpoints", 0u64), ("checkpoint_32", 32)] {
            group.bench_with_input(BenchmarkId::new(label, depth), &depth, |b, &depth| {
                let store = create_store(interval);
                let head = build_chain(&store, depth, 50);

                b.iter(|| {
                    store.resolver().clear_cache();
                    black_box(store.get_snapshot(head).unwrap());
                });
            });
        }
    }

    group.finish();
}

/// Single-key lookup deep in history
fn bench_value_lookup(c: &mut Criterion) {
    let store = create_store(32);
    let head = build_chain(&store, 1000, 200);
    let key = ContentKey::parse("db.t7");

    c.bench_function("value_lookup_depth_1000", |b| {
        b.iter(|| {
            store.resolver().clear_cache();
            black_box(store.get_value(head, &key).unwrap());
        });
    });
}

/// Commit throughput on a filesystem store
fn bench_commit(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = VersionStore::open(StoreConfig::at(dir.path().join("store"))).unwrap();
    let mut head = store.root_commit();
    let mut i = 0u64;

    c.bench_function("commit_fs", |b| {
        b.iter(|| {
            i += 1;
            head = store
                .commit(
                    "main",
                    head,
                    vec![Operation::put(format!("k{}", i % 100).as_str(), i.to_le_bytes().to_vec())],
                    CommitMeta::new("bench", "c"),
                )
                .unwrap();
        });
    });
}

/// Diff and dry-run merge between diverged branches
fn bench_diff_and_merge(c: &mut Criterion) {
    let store = create_store(32);
    let base = build_chain(&store, 200, 100);
    store
        .create_reference("feature", ReferenceKind::Branch, RefTarget::Commit(base))
        .unwrap();

    let mut head = base;
    for i in 0..50 {
        head = store
            .commit(
                "feature",
                head,
                vec![Operation::put(format!("feature.t{}", i).as_str(), b"x".to_vec())],
                CommitMeta::new("bench", "f"),
            )
            .unwrap();
    }

    c.bench_function("diff_200_vs_250", |b| {
        b.iter(|| black_box(store.diff("main", "feature", &DiffOptions::default()).unwrap()));
    });

    c.bench_function("merge_dry_run_50_commits", |b| {
        let options = MergeOptions::default().dry_run();
        b.iter(|| black_box(store.merge("feature", "main", &options).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_snapshot_resolution,
    bench_value_lookup,
    bench_commit,
    bench_diff_and_merge,
);
criterion_main!(benches);
