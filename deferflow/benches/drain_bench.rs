//! Benchmarks for draining deferred actions.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deferflow::{DeferOptions, DeferScope, NoOpLifecycle};
use std::sync::Arc;

fn drain_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let scope = DeferScope::new().with_lifecycle(Arc::new(NoOpLifecycle));

    c.bench_function("drain_100_sync", |b| {
        b.iter(|| {
            runtime.block_on(scope.provide(|defer| async move {
                for _ in 0..100 {
                    defer.defer_sync(|| Ok(()));
                }
                Ok::<_, anyhow::Error>(black_box(42))
            }))
        })
    });

    c.bench_function("drain_100_async", |b| {
        b.iter(|| {
            runtime.block_on(scope.provide(|defer| async move {
                for _ in 0..100 {
                    defer.defer_async_with(|| async { Ok(()) }, DeferOptions::new().no_throw(true));
                }
                Ok::<_, anyhow::Error>(black_box(42))
            }))
        })
    });
}

criterion_group!(benches, drain_benchmark);
criterion_main!(benches);
