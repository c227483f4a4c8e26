//! Tunnel frame codec benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nxvpn::tunnel::framing::{self, FrameDecoder};
use std::hint::black_box;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn encode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [64usize, 576, 1280, 8192] {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_chunked", size), &data, |b, data| {
            b.iter(|| {
                for frame in framing::encode_chunked(black_box(data), 1280) {
                    black_box(frame);
                }
            });
        });
    }

    group.finish();
}

fn decode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    // a burst of back-to-back frames as the inbound pump sees it
    let mut stream = Vec::new();
    for _ in 0..32 {
        stream.extend(framing::encode(&payload(1280)));
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for read_size in [512usize, 4096, 8192] {
        group.bench_with_input(
            BenchmarkId::new("reassemble", read_size),
            &stream,
            |b, stream| {
                b.iter(|| {
                    let mut decoder = FrameDecoder::new();
                    for chunk in stream.chunks(read_size) {
                        decoder.extend(chunk);
                        while let Ok(Some(frame)) = decoder.next_frame() {
                            black_box(frame);
                        }
                    }
                    assert_eq!(decoder.frames_decoded(), 32);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
