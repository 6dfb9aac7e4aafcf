//! Throughput benchmarks for cairn hazard-pointer reclamation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicPtr, Ordering};

use cairn::HazardArray;
use cairn_queue::Queue;

fn bench_protect(c: &mut Criterion) {
    let mut group = c.benchmark_group("protect");

    let shared = AtomicPtr::new(Box::into_raw(Box::new(42u64)));

    group.bench_function("protect_clear", |b| {
        let array = HazardArray::<1>::new();
        let mut hp = array.hazard_ptr::<u64>();
        b.iter(|| {
            let p = hp.protect(&shared);
            black_box(p);
            hp.clear();
        });
    });

    group.bench_function("array_reserve", |b| {
        b.iter(|| {
            let array = HazardArray::<2>::new();
            black_box(&array);
        });
    });

    group.finish();

    let last = shared.swap(std::ptr::null_mut(), Ordering::SeqCst);
    unsafe { drop(Box::from_raw(last)) };
}

fn bench_retire(c: &mut Criterion) {
    let mut group = c.benchmark_group("retire");

    for batch_size in [10, 50, 100, 500].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &size| {
                b.iter(|| {
                    for i in 0..size {
                        let node = Box::into_raw(Box::new(i as u64));
                        let slot = AtomicPtr::new(node);
                        let array = HazardArray::<1>::new();
                        let mut hp = array.hazard_ptr::<u64>();
                        hp.protect(&slot);
                        slot.store(std::ptr::null_mut(), Ordering::SeqCst);
                        unsafe { hp.retire() };
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    group.throughput(Throughput::Elements(1));
    group.bench_function("push_pop_boxed", |b| {
        let q = Queue::new();
        b.iter(|| {
            q.push(black_box(1u64));
            black_box(q.pop());
        });
    });

    group.bench_function("push_pop_pooled", |b| {
        let q = Queue::with_pool();
        b.iter(|| {
            q.push(black_box(1u64));
            black_box(q.pop());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_protect, bench_retire, bench_queue);
criterion_main!(benches);
