use bytes::Bytes;
use conduit::adapter::{bytes_stream, MemoryAdapter};
use conduit::{Conduit, TransferOptions};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

const CHUNK: usize = 64 * 1024;

/// Payload split into 64 KiB chunks, mildly compressible
fn payload(size_mb: usize) -> Vec<Bytes> {
    let block: Vec<u8> = (0..CHUNK).map(|i| (i % 251) as u8).collect();
    let block = Bytes::from(block);
    (0..size_mb * 1024 * 1024 / CHUNK).map(|_| block.clone()).collect()
}

/// Upload throughput through different transform chains
fn bench_upload_chains(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let conduit = Conduit::new(Arc::new(MemoryAdapter::new())).unwrap();

    let chains: Vec<(&str, Vec<(&str, serde_json::Value)>)> = vec![
        ("passthrough", vec![]),
        ("md5", vec![("checksum", json!({ "algorithm": "md5" }))]),
        ("blake3", vec![("checksum", json!({ "algorithm": "blake3" }))]),
        ("zstd", vec![("compress", json!({ "algorithm": "zstd" }))]),
        (
            "sha256+gzip+progress",
            vec![
                ("checksum", json!({ "algorithm": "sha256" })),
                ("compress", json!({ "algorithm": "gzip" })),
                ("progress", json!({})),
            ],
        ),
    ];

    let mut group = c.benchmark_group("upload_chains");
    for size_mb in [1usize, 16] {
        let chunks = payload(size_mb);
        group.throughput(Throughput::Bytes((size_mb * 1024 * 1024) as u64));

        for (name, stages) in &chains {
            let pipeline = stages
                .iter()
                .try_fold(conduit.pipeline(), |p, (id, opts)| p.use_transform_with(id, opts.clone()))
                .unwrap();

            group.bench_with_input(BenchmarkId::new(*name, size_mb), &chunks, |b, chunks| {
                b.to_async(&runtime).iter(|| async {
                    let report = pipeline
                        .upload(
                            bytes_stream(chunks.clone()),
                            TransferOptions::new().name("bench.bin"),
                        )
                        .unwrap()
                        .await
                        .unwrap();
                    black_box(report);
                });
            });
        }
    }
    group.finish();
}

/// Cost of wiring a chain, without moving data
fn bench_chain_setup(c: &mut Criterion) {
    let conduit = Conduit::new(Arc::new(MemoryAdapter::new())).unwrap();
    let pipeline = conduit
        .pipeline()
        .use_transform("checksum")
        .unwrap()
        .use_transform("compress")
        .unwrap()
        .use_transform("progress")
        .unwrap();

    c.bench_function("chain_setup", |b| {
        b.iter(|| {
            let transfer = pipeline
                .upload(bytes_stream(Vec::new()), TransferOptions::new())
                .unwrap();
            black_box(transfer);
        });
    });
}

criterion_group!(benches, bench_upload_chains, bench_chain_setup);
criterion_main!(benches);
