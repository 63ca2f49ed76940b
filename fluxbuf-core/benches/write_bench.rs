//! Benchmarks for the buffer write path
//!
//! - batches that fit the staged chunk (single-shot append)
//! - batches larger than a chunk (step-by-step splitting)
//! - formatted and compressed writes

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use fluxbuf_core::{
    Buffer, BufferConfig, Compression, LengthPrefixed, MemoryBackend, Metadata, WriteOptions,
};
use std::collections::BTreeMap;

fn batch(records: usize, record_size: usize) -> BTreeMap<Metadata, Vec<Bytes>> {
    let metadata = Metadata::default()
        .with_timekey(1460390400)
        .with_tag("bench");
    let record = Bytes::from(vec![0xABu8; record_size]);
    BTreeMap::from([(metadata, vec![record; records])])
}

fn started(config: BufferConfig) -> Buffer {
    let buffer = Buffer::new(config, MemoryBackend).expect("valid config");
    buffer.start().expect("start");
    buffer
}

/// Flush everything so the next iteration starts below the total limit
fn drain(buffer: &Buffer) {
    while let Some(chunk) = buffer.dequeue_chunk().expect("started") {
        buffer.purge_chunk(chunk.id()).expect("purge");
    }
}

fn bench_single_shot(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_single_shot");

    for records in [10, 100, 1000] {
        let batches = batch(records, 128);
        let buffer = started(BufferConfig::default());

        group.throughput(Throughput::Bytes((records * 128) as u64));
        group.bench_function(format!("{}_records", records), |b| {
            b.iter(|| {
                buffer
                    .write(black_box(&batches), WriteOptions::default())
                    .expect("write");
                drain(&buffer);
            })
        });
    }

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_split");
    group.sample_size(20);

    let config = BufferConfig {
        chunk_limit_size: 64 * 1024,
        ..Default::default()
    };
    let batches = batch(10_000, 128);

    group.throughput(Throughput::Bytes(10_000 * 128));
    group.bench_function("10000_records_64k_chunks", |b| {
        b.iter_batched(
            || started(config.clone()),
            |buffer| {
                buffer
                    .write(black_box(&batches), WriteOptions::default())
                    .expect("write");
                buffer
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("10000_records_64k_chunks_formatted", |b| {
        b.iter_batched(
            || started(config.clone()),
            |buffer| {
                buffer
                    .write(black_box(&batches), WriteOptions::formatted(&LengthPrefixed))
                    .expect("write");
                buffer
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_compressed(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_compressed");

    let buffer = started(BufferConfig {
        compress: Compression::Lz4,
        ..Default::default()
    });
    let batches = batch(1000, 128);

    group.throughput(Throughput::Bytes(1000 * 128));
    group.bench_function("lz4_1000_records", |b| {
        b.iter(|| {
            buffer
                .write(black_box(&batches), WriteOptions::default())
                .expect("write");
            buffer.enqueue_all(true, |_, _| true).expect("enqueue");
            drain(&buffer);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_single_shot, bench_split, bench_compressed);
criterion_main!(benches);
