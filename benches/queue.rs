use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use infer_stream::synthetic::{synthetic_frame, SyntheticExecutor};
use infer_stream::{BoundedQueue, Executor};

fn benchmark_queue_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_put_get");

    for capacity in [1usize, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            capacity,
            |b, &capacity| {
                let queue = BoundedQueue::new(capacity);
                b.iter(|| {
                    queue.try_put(black_box(42u64)).unwrap();
                    black_box(queue.try_get().unwrap());
                });
            },
        );
    }

    group.finish();
}

fn benchmark_force_put_saturated(c: &mut Criterion) {
    let queue = BoundedQueue::new(1);
    queue.try_put(0u64).unwrap();

    c.bench_function("force_put_saturated", |b| {
        b.iter(|| {
            black_box(queue.force_put(black_box(7u64)).unwrap());
        });
    });
}

fn benchmark_synthetic_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthetic_inference");

    for size in [1_024usize, 16_384, 262_144].iter() {
        let frame = synthetic_frame(0, *size);
        let mut executor = SyntheticExecutor::new(Duration::ZERO);

        group.bench_with_input(BenchmarkId::new("frame_len", size), &frame, |b, frame| {
            b.iter(|| executor.inference(black_box(frame)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_queue_put_get,
    benchmark_force_put_saturated,
    benchmark_synthetic_inference
);
criterion_main!(benches);
