//! Criterion benchmarks for the inbound frame path.
//!
//! Every byte a board sends goes through `FrameReader::push` and every frame
//! through `classify`, on the reader thread, so these bound how many frames
//! per second a single port can sustain.
//!
//! Run with: cargo bench --bench frame_pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensor_hub::protocol::{classify, FrameReader};

/// A stream of `count` frames mixing the payload shapes boards send.
fn sample_stream(count: usize) -> Vec<u8> {
    let frames = [
        "SENSOR_AUTO:101.5,99.8,100.2,98.7;",
        "12.5,13.0,bad,14.25;",
        "42.0;",
        "calibration done;",
        " ;",
    ];
    frames
        .iter()
        .cycle()
        .take(count)
        .flat_map(|frame| frame.bytes())
        .collect()
}

/// Split throughput for different read chunk sizes.
fn frame_reader_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_reader_push");
    let stream = sample_stream(1000);

    for chunk in [1usize, 16, 64, 256] {
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut reader = FrameReader::new();
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    frames += reader.push(black_box(piece)).len();
                }
                black_box(frames)
            });
        });
    }

    group.finish();
}

/// Classification cost per payload shape.
fn classify_payloads(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    let payloads = [
        ("auto_report", "SENSOR_AUTO:101.5,99.8,100.2,98.7"),
        ("comma_report", "12.5,13.0,bad,14.25"),
        ("single", "42.0"),
        ("text", "calibration done"),
    ];

    for (name, payload) in payloads {
        group.bench_with_input(BenchmarkId::new("payload", name), &payload, |b, payload| {
            b.iter(|| black_box(classify(black_box(payload))));
        });
    }

    group.finish();
}

/// Split and classify together, as the reader does.
fn split_and_classify(c: &mut Criterion) {
    let stream = sample_stream(1000);
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("split_and_classify", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            for piece in stream.chunks(256) {
                for frame in reader.push(piece) {
                    black_box(classify(&frame));
                }
            }
        });
    });
    group.finish();
}

criterion_group!(benches, frame_reader_push, classify_payloads, split_and_classify);
criterion_main!(benches);
