//! Criterion benchmarks for submission and notification primitives.

use std::hint::black_box;
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use reflux_core::{CycleId, Priority, SortKey, TypeKey};
use reflux_engine::{ChangeEvent, DispatchGateway, EventDispatcher, NotificationQueue};
use reflux_test_utils::fixtures::{ApplyDamage, Health};

fn bench_local_submit(c: &mut Criterion) {
    let mut gateway = DispatchGateway::new(CycleId(1), 4096);
    c.bench_function("local_submit_1k", |b| {
        b.iter(|| {
            for i in 0..1000 {
                gateway.submit(ApplyDamage {
                    target: i,
                    amount: 1,
                });
            }
            black_box(gateway.refresh());
        });
    });
}

fn bench_parallel_submit(c: &mut Criterion) {
    let mut gateway = DispatchGateway::new(CycleId(1), 4096);
    c.bench_function("parallel_submit_4x250", |b| {
        b.iter(|| {
            for worker in 0..4u64 {
                let writer = gateway.acquire_parallel_writer();
                let handle = thread::spawn(move || {
                    for i in 0..250u64 {
                        let key = SortKey(worker * 250 + i);
                        let _ = writer.submit(
                            key,
                            ApplyDamage {
                                target: i as usize,
                                amount: 1,
                            },
                        );
                    }
                });
                gateway.register_completion(handle);
            }
            black_box(gateway.refresh());
        });
    });
}

fn bench_drain(c: &mut Criterion) {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.on_change::<Health, _>(|new, _| {
        black_box(new.hp.len());
    });
    let value: reflux_core::SharedState = std::sync::Arc::new(Health::uniform(16, 100));
    c.bench_function("drain_1k_events", |b| {
        b.iter(|| {
            let mut queue = NotificationQueue::new();
            for (i, priority) in Priority::ALL.iter().cycle().take(1000).enumerate() {
                queue.push(ChangeEvent {
                    state: TypeKey::of::<Health>(),
                    priority: *priority,
                    cycle: CycleId(i as u64),
                    new: value.clone(),
                    old: None,
                });
            }
            black_box(dispatcher.drain(&mut queue, Duration::from_secs(1)));
        });
    });
}

criterion_group!(benches, bench_local_submit, bench_parallel_submit, bench_drain);
criterion_main!(benches);
