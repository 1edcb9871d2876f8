//! Performance benchmarks for storage operations.
//!
//! These benchmarks measure the hot paths in the engine:
//! - Path parsing and containment checks
//! - Directory listing
//! - Upload ingestion (hashing and collision-free claims)

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daemon::files::{
    tree, upload, MissingDirectory, RelativePath, StorageRoot, UploadItem, UploadOptions,
};
use tempfile::TempDir;

fn setup_root() -> (TempDir, StorageRoot) {
    let temp = TempDir::new().unwrap();
    let root = StorageRoot::create(temp.path().join("root")).unwrap();
    (temp, root)
}

/// Benchmark path parsing and resolution.
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let (_temp, root) = setup_root();
    std::fs::create_dir_all(root.path().join("a/b/c/d")).unwrap();
    std::fs::write(root.path().join("a/b/c/d/file.txt"), b"x").unwrap();

    group.bench_function("parse_relative", |b| {
        b.iter(|| RelativePath::parse(black_box("a/b/./c//d/file.txt")).unwrap());
    });

    group.bench_function("parse_rejects_traversal", |b| {
        b.iter(|| RelativePath::parse(black_box("a/b/../../../etc/passwd")).is_err());
    });

    let existing = RelativePath::parse("a/b/c/d/file.txt").unwrap();
    group.bench_function("resolve_existing", |b| {
        let resolver = root.resolver();
        b.iter(|| resolver.resolve(black_box(&existing)).unwrap());
    });

    let missing = RelativePath::parse("a/b/c/new/deeper/file.txt").unwrap();
    group.bench_function("resolve_for_creation", |b| {
        let resolver = root.resolver();
        b.iter(|| resolver.resolve_for_creation(black_box(&missing)).unwrap());
    });

    group.finish();
}

/// Benchmark directory listing at several sizes.
fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list");

    for count in [10usize, 100, 1000] {
        let (_temp, root) = setup_root();
        for i in 0..count {
            if i % 10 == 0 {
                std::fs::create_dir(root.path().join(format!("Dir{i}"))).unwrap();
            } else {
                std::fs::write(root.path().join(format!("file{i}.txt")), b"data").unwrap();
            }
        }

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("entries_{count}"), |b| {
            b.iter(|| {
                tree::list(&root, &RelativePath::root(), MissingDirectory::Fail).unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark ingesting single items of various sizes.
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    let options = UploadOptions::default();

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let (_temp, root) = setup_root();
        let data = vec![0xA5u8; size];
        let mut n = 0u64;

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("item_{}KB", size / 1024), |b| {
            b.iter(|| {
                n += 1;
                let item = UploadItem::new(format!("file_{n}.bin"), Cursor::new(data.as_slice()));
                upload::ingest(&root, &RelativePath::root(), [item], &options).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_list, bench_ingest);

criterion_main!(benches);
