//! Protocol encoding/decoding benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rsock_protocol::{
    request_stream_frame, response_frame, setup_frame, Frame, FrameDecoder, Payload, SetupParams,
};

fn create_test_payload(size: usize) -> Payload {
    Payload::from_data("x".repeat(size)).with_metadata("Some Request Response Meta")
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let payload = create_test_payload(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(response_frame(7, Some(payload), true).unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    for size in [100, 1000, 10000] {
        let encoded = response_frame(7, Some(&create_test_payload(size)), true).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(Frame::parse(encoded.clone()).unwrap()));
        });
    }

    group.finish();
}

fn bench_request_stream_encode(c: &mut Criterion) {
    let payload = Payload::from_data("{\"arg1\":\"yes\",\"arg2\":\"no\"}");

    c.bench_function("request_stream_encode", |b| {
        b.iter(|| black_box(request_stream_frame(3, 256, Some(&payload)).unwrap()));
    });
}

fn bench_setup_encode(c: &mut Criterion) {
    let params = SetupParams::default().with_mime_types("application/json", "application/json");

    c.bench_function("setup_encode", |b| {
        b.iter(|| black_box(setup_frame(&params, None).unwrap()));
    });
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");

    for count in [10, 100, 1000] {
        let mut buf = BytesMut::new();
        for i in 0..count {
            let payload = Payload::from_data(format!("{{\"seq\":{}}}", i));
            buf.extend_from_slice(&response_frame(1, Some(&payload), i + 1 == count).unwrap());
        }
        let wire: Bytes = buf.freeze();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &wire, |b, wire| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                // Feed in transport-sized chunks.
                for chunk in wire.chunks(1500) {
                    decoder.extend(chunk);
                }
                let mut frames = 0;
                while let Some(frame) = decoder.decode().unwrap() {
                    black_box(&frame);
                    frames += 1;
                }
                frames
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_parse,
    bench_request_stream_encode,
    bench_setup_encode,
    bench_stream_decode,
);

criterion_main!(benches);
