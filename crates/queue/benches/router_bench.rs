use std::sync::Arc;

use common::CorrelationId;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use queue::{
    Domain, HandlerRegistry, InMemoryJobTransport, JobEvent, JobPayload, PriorityQueueRouter,
    QueueJob, RouterConfig, handler_fn,
};

fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            Domain::Inventory,
            "stock_update",
            handler_fn(|_job: QueueJob| async { Ok(serde_json::Value::Null) }),
        )
        .unwrap();
    registry
}

fn job(priority: u8) -> QueueJob {
    QueueJob::new(
        JobPayload::new(Domain::Inventory, "stock_update"),
        CorrelationId::new(),
    )
    .with_priority(priority)
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let router = PriorityQueueRouter::new(
        registry(),
        Arc::new(InMemoryJobTransport::new()),
        RouterConfig::default(),
    );

    c.bench_function("router/enqueue", |b| {
        b.iter(|| {
            rt.block_on(async {
                router.enqueue(job(5)).await.unwrap();
            });
        });
    });
}

fn bench_enqueue_and_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("router/enqueue_and_drain");

    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                rt.block_on(async {
                    let router = PriorityQueueRouter::new(
                        registry(),
                        Arc::new(InMemoryJobTransport::new()),
                        RouterConfig::default(),
                    );
                    let mut events = router.subscribe();
                    router.start();

                    for i in 0..count {
                        router.enqueue(job((i % 10) as u8)).await.unwrap();
                    }

                    let mut finished = 0;
                    while finished < count {
                        if let Some(JobEvent::Finished(_)) = events.recv().await {
                            finished += 1;
                        }
                    }
                    router.shutdown().await;
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_enqueue_and_drain);
criterion_main!(benches);
