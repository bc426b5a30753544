//! HTTP/2 engine benchmarks
//!
//! Measures the hot paths of the frame codec and the flow-control
//! window holder.
//!
//! Run with: cargo bench --bench h2_performance

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use h2mux::h2::codec::FrameCodec;
use h2mux::h2::frames::{
    DataFrame, FrameFlags, FrameHeader, FrameType, HeadersFrame, SettingsFrame,
    WindowUpdateFrame,
};
use h2mux::h2::write_queue::{prepare_batch, WriteRequest, WriteTask};
use h2mux::h2::{SettingsBuilder, WindowSize};

// ========== Frame Header Benchmarks ==========

fn bench_frame_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_header");

    let header = FrameHeader {
        length: 1024,
        kind: FrameType::Data.as_u8(),
        flags: FrameFlags::from_u8(0x01),
        stream_id: 1,
    };

    group.bench_function("encode", |b| {
        b.iter(|| {
            let encoded = FrameCodec::encode_header(black_box(&header));
            black_box(encoded);
        });
    });

    let encoded = FrameCodec::encode_header(&header);
    group.bench_function("decode", |b| {
        b.iter(|| {
            let decoded = FrameCodec::decode_header(black_box(&encoded));
            black_box(decoded);
        });
    });

    group.finish();
}

// ========== Frame Body Benchmarks ==========

fn bench_data_frame_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_frame_encode");

    for size in [256, 1024, 4096, 16375].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        let data = Bytes::from(vec![0u8; *size]);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let frame = DataFrame::new(black_box(1), black_box(data.clone()), false);
                let encoded = FrameCodec::encode_data_frame(black_box(&frame));
                black_box(encoded);
            });
        });
    }

    group.finish();
}

fn bench_control_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_frames");

    let settings = SettingsBuilder::new()
        .header_table_size(4096)
        .enable_push(false)
        .max_concurrent_streams(100)
        .initial_window_size(65535)
        .max_frame_size(16384)
        .build()
        .unwrap();
    let settings_frame = SettingsFrame::new(settings);

    group.bench_function("encode_settings", |b| {
        b.iter(|| {
            let encoded = FrameCodec::encode_settings_frame(black_box(&settings_frame));
            black_box(encoded);
        });
    });

    let headers_frame = HeadersFrame::new(1, Bytes::from(vec![0u8; 128]), false, true);
    group.bench_function("encode_headers", |b| {
        b.iter(|| {
            let encoded = FrameCodec::encode_headers_frame(black_box(&headers_frame));
            black_box(encoded);
        });
    });

    group.bench_function("encode_window_update", |b| {
        b.iter(|| {
            let frame = WindowUpdateFrame::new(black_box(1), black_box(32768));
            let encoded = FrameCodec::encode_window_update_frame(black_box(&frame));
            black_box(encoded);
        });
    });

    group.finish();
}

// ========== Flow Control Benchmarks ==========

fn bench_window_bookkeeping(c: &mut Criterion) {
    let mut group = c.benchmark_group("window");

    group.bench_function("try_book_and_refund", |b| {
        let window = WindowSize::new(65535);
        b.iter(|| {
            let granted = window.try_book(black_box(16384));
            window.refund(black_box(granted));
        });
    });

    group.bench_function("credit", |b| {
        let window = WindowSize::new(0);
        b.iter(|| {
            window.credit(black_box(1));
        });
    });

    group.finish();
}

// ========== Write Batch Benchmarks ==========

fn bench_batch_preparation(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_batch");

    group.bench_function("coalesce_64_tasks", |b| {
        b.iter(|| {
            let mut batch = Vec::with_capacity(64);
            for stream in 0..16u32 {
                let stream_id = stream * 2 + 1;
                batch.push(WriteTask {
                    request: WriteRequest::WindowUpdate {
                        stream_id,
                        increment: 1024,
                    },
                    done: None,
                });
                batch.push(WriteTask {
                    request: WriteRequest::WindowUpdate {
                        stream_id,
                        increment: 512,
                    },
                    done: None,
                });
                batch.push(WriteTask {
                    request: WriteRequest::Frame {
                        kind: FrameType::Data,
                        stream_id,
                        dependency: 0,
                        weight: 0,
                        bytes: Bytes::from_static(&[0u8; 64]),
                    },
                    done: None,
                });
                batch.push(WriteTask {
                    request: WriteRequest::Frame {
                        kind: FrameType::RstStream,
                        stream_id,
                        dependency: 0,
                        weight: 0,
                        bytes: Bytes::from_static(&[0u8; 13]),
                    },
                    done: None,
                });
            }
            let out = prepare_batch(black_box(batch));
            black_box(out);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_header,
    bench_data_frame_sizes,
    bench_control_frames,
    bench_window_bookkeeping,
    bench_batch_preparation,
);
criterion_main!(benches);
