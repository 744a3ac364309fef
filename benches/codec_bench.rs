//! Benchmarks for the annal record codecs
//!
//! Run with: cargo bench

use annal::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Cursor;
use tempfile::tempdir;

fn cpu_instances(count: usize) -> Vec<Instance<'static>> {
    (0..count)
        .map(|i| Instance::named(i as i32, format!("cpu{}", i)))
        .collect()
}

fn bench_indom(c: &mut Criterion) {
    let mut group = c.benchmark_group("indom");

    for size in [8, 128, 2048] {
        let record = InDomRecord {
            stamp: Timestamp::new(1700000000, 0),
            indom: 3,
            kind: InDomKind::Full,
            instances: cpu_instances(size),
        };

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("encode_{}", size), |b| {
            b.iter(|| record.encode(black_box(ArchiveVersion::V3)).unwrap())
        });

        let bytes = record.encode(ArchiveVersion::V3).unwrap();

        group.bench_function(format!("decode_{}", size), |b| {
            b.iter(|| InDomRecord::decode(black_box(&bytes), ArchiveVersion::V3).unwrap())
        });

        group.bench_function(format!("decode_owned_{}", size), |b| {
            b.iter(|| {
                InDomRecord::decode(black_box(&bytes), ArchiveVersion::V3)
                    .unwrap()
                    .into_owned()
            })
        });
    }

    group.finish();
}

fn bench_labels(c: &mut Criterion) {
    let mut group = c.benchmark_group("labels");

    let json = r#"{"hostname":"node17","region":"eu-west","rack":"b12"}"#;
    let sets: Vec<LabelSet> = (0..64)
        .map(|i| LabelSet::new(i, json, vec![]))
        .collect();
    let record = LabelRecord {
        stamp: Timestamp::new(1700000000, 0),
        scope: LabelScope::Instances,
        ident: 3,
        sets,
    };

    group.throughput(Throughput::Elements(64));

    group.bench_function("encode_64_sets", |b| {
        b.iter(|| record.encode(black_box(ArchiveVersion::V3)).unwrap())
    });

    let bytes = record.encode(ArchiveVersion::V3).unwrap();

    group.bench_function("decode_64_sets", |b| {
        b.iter(|| LabelRecord::decode(black_box(&bytes), ArchiveVersion::V3).unwrap())
    });

    group.finish();
}

fn bench_index_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("tindex");

    let dir = tempdir().unwrap();
    let base = dir.path().join("bench");
    let control = ArchiveControl::create(
        &base,
        ArchiveVersion::V3,
        Timestamp::new(1000, 0),
        "bench",
        "UTC",
    )
    .unwrap();
    let mut writer = ArchiveWriter::new(control, NoCache);
    for i in 0..10_000 {
        writer.put_index(Some(Timestamp::new(1000 + i, 0))).unwrap();
    }
    writer.close().unwrap();

    let index_bytes = std::fs::read(archive_path(&base, VOL_INDEX)).unwrap();

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("load_10k", |b| {
        b.iter(|| {
            load_index(
                &mut Cursor::new(black_box(&index_bytes)),
                ArchiveVersion::V3,
            )
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_indom, bench_labels, bench_index_load);
criterion_main!(benches);
