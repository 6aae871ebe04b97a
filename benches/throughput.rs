//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use iflag_core::core::codec::{self, Value, ValueKind};
use iflag_core::core::protocol::checksum::crc16_buypass;
use iflag_core::core::protocol::framing::{decode_response, encode_response};
use iflag_core::ChecksumType;
use rust_decimal::Decimal;
use std::hint::black_box;

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..255).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("crc16_buypass", |b| {
        b.iter(|| black_box(crc16_buypass(black_box(&data))))
    });

    group.bench_function("decode_response", |b| {
        let frame = encode_response(&data[..250], ChecksumType::Crc16Buypass).unwrap();
        b.iter(|| {
            let decoded = decode_response(black_box(&frame), ChecksumType::Crc16Buypass).unwrap();
            black_box(decoded)
        })
    });

    group.finish();
}

fn codec_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let float2 = codec::encode(ValueKind::Float2, &Value::Float2(Decimal::new(1013, 3))).unwrap();
    group.bench_function("float2_decode", |b| {
        b.iter(|| black_box(codec::decode(ValueKind::Float2, black_box(&float2)).unwrap()))
    });

    let index = Value::Index(Decimal::new(1_234_567_891_234, 8));
    group.bench_function("index_encode", |b| {
        b.iter(|| black_box(codec::encode(ValueKind::Index, black_box(&index)).unwrap()))
    });

    let date = [0x4F, 0x44, 0xD0, 0x00];
    group.bench_function("date_decode", |b| {
        b.iter(|| black_box(codec::decode(ValueKind::Date, black_box(&date))))
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, codec_benchmark);
criterion_main!(benches);
