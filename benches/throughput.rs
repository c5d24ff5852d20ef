//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use xtools_core::core::codec::{encode, TextFormat};
use xtools_core::core::protocol::{calc_checksum, ChecksumAlgorithm, ChecksumContext, FrameParameters};

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for algorithm in [
        ChecksumAlgorithm::Crc8,
        ChecksumAlgorithm::Crc16Modbus,
        ChecksumAlgorithm::Crc16Ccitt,
        ChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Sum16,
    ] {
        group.bench_function(algorithm.name(), |b| {
            b.iter(|| {
                let ctx = ChecksumContext::new(algorithm, black_box(&data));
                black_box(calc_checksum(&ctx))
            })
        });
    }

    group.finish();
}

fn frame_benchmark(c: &mut Criterion) {
    let payload = "01 03 00 00 00 0A ".repeat(32);

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(encode(&payload, TextFormat::Hex).len() as u64));

    group.bench_function("hex_payload_modbus", |b| {
        let params = FrameParameters::new(payload.as_str(), TextFormat::Hex)
            .prefix("\\xAA")
            .suffix("\\xBB")
            .crc(ChecksumAlgorithm::Crc16Modbus, false);
        b.iter(|| black_box(params.to_bytes()))
    });

    group.bench_function("escaped_text", |b| {
        let params = FrameParameters::new("AT+CMD=1,2,3\\r\\n", TextFormat::Utf8).escape(true);
        b.iter(|| black_box(params.to_bytes()))
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, frame_benchmark);
criterion_main!(benches);
