//! Criterion benchmarks for the acquisition hot paths.
//!
//! The producer side must keep up with a device streaming thousands of frames per
//! second while a consumer drains on a 10 ms tick. Measured here:
//! - frame parsing
//! - queue push, with and without overflow eviction
//! - draining a full queue into the channel buffers
//! - downsampling a 20 000 sample window for plotting
//!
//! Run with: cargo bench --bench pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serial_telemetry::buffer::ChannelBuffers;
use serial_telemetry::downsample;
use serial_telemetry::parser::{parse_line, Row};
use serial_telemetry::queue::BoundedRowQueue;
use std::sync::Arc;
use std::thread;

fn frame(channels: usize) -> String {
    (0..channels)
        .map(|c| (512 + c * 97).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");

    for channels in [1, 3, 8, 16] {
        let line = frame(channels);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(channels), &line, |b, line| {
            b.iter(|| black_box(parse_line(black_box(line), channels)));
        });
    }

    group.finish();
}

fn queue_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push");
    let row = Row::new(vec![1, 2, 3], 3).unwrap();

    // room to spare: plain enqueue
    let queue = BoundedRowQueue::new(1_000_000);
    group.bench_function("not_full", |b| {
        b.iter(|| {
            if queue.approximate_size() > 900_000 {
                queue.drain_all();
            }
            black_box(queue.push(row.clone()));
        });
    });

    // permanently full: every push evicts
    let queue = BoundedRowQueue::new(1_024);
    for _ in 0..1_024 {
        queue.push(row.clone());
    }
    group.bench_function("evicting", |b| {
        b.iter(|| black_box(queue.push(row.clone())));
    });

    group.finish();
}

fn drain_into_buffers(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");

    for rows in [100usize, 1_000, 10_000] {
        let queue = BoundedRowQueue::new(rows);
        let buffers = ChannelBuffers::new(3, 20_000);
        let row = Row::new(vec![1, 2, 3], 3).unwrap();

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                for _ in 0..rows {
                    queue.push(row.clone());
                }
                black_box(buffers.drain(&queue));
            });
        });
    }

    group.finish();
}

/// Drain while a producer thread pushes flat out.
fn drain_under_contention(c: &mut Criterion) {
    let queue = Arc::new(BoundedRowQueue::new(10_000));
    let buffers = ChannelBuffers::new(3, 20_000);
    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

    let producer = {
        let queue = Arc::clone(&queue);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let row = Row::new(vec![1, 2, 3], 3).unwrap();
            while running.load(std::sync::atomic::Ordering::Relaxed) {
                queue.push(row.clone());
            }
        })
    };

    c.bench_function("drain_with_live_producer", |b| {
        b.iter(|| black_box(buffers.drain(&queue)));
    });

    running.store(false, std::sync::atomic::Ordering::Relaxed);
    producer.join().unwrap();
}

fn downsample_window(c: &mut Criterion) {
    let buffers = ChannelBuffers::new(1, 20_000);
    let mut group = c.benchmark_group("downsample");

    for max_points in [None, Some(2_000), Some(500)] {
        let label = max_points.map_or("full".to_string(), |m| m.to_string());
        group.bench_with_input(BenchmarkId::from_parameter(label), &max_points, |b, &max| {
            b.iter(|| black_box(downsample::query(&buffers, 0, max).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    parse_throughput,
    queue_push,
    drain_into_buffers,
    drain_under_contention,
    downsample_window
);
criterion_main!(benches);
