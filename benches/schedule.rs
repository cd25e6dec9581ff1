use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sunset_gan::queue::SnapshotQueue;
use sunset_gan::scheduler::{PenaltySign, RegularizationSchedule};
use sunset_gan::weighting::LossDecay;

fn bench_loss_decay_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("loss_decay_solve");
    for steps in [8usize, 128, 2048] {
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, &steps| {
            b.iter(|| LossDecay::solve(black_box(steps)).unwrap());
        });
    }
    group.finish();
}

fn bench_queue_update(c: &mut Criterion) {
    c.bench_function("queue_update_1000_steps", |b| {
        b.iter(|| {
            let mut queue = SnapshotQueue::new(0u64, 25, 10, 10).unwrap();
            for t in 1..=1000u64 {
                queue.update(black_box(t), t);
            }
            queue.len()
        });
    });
}

fn bench_regularization_schedule(c: &mut Criterion) {
    let schedule = RegularizationSchedule::new(1e-2, 1e-4, PenaltySign::Negative);
    c.bench_function("regularization_coefficient", |b| {
        b.iter(|| (1..=1000u64).map(|t| schedule.coefficient(black_box(t))).sum::<f64>());
    });
}

criterion_group!(
    benches,
    bench_loss_decay_solve,
    bench_queue_update,
    bench_regularization_schedule
);
criterion_main!(benches);
