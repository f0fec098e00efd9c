//! Benchmarks for the destination transformers and the in-memory job path.
//!
//! Export jobs transform every event of a window, so transformer cost
//! dominates large backfills.

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use elasticdash_core::{AnalyticsEvent, JobKind, NoOpErrorTracker, TestClock, TraceDeleteJobPayload};
use elasticdash_export::{
    storage::mock::{MockExecutionStore, MockJobStore},
    transform::{mixpanel, posthog},
    DeletionReconciler, EngineConfig, ExportEngine, HandlerRegistry, JobDispatcher,
    TraceDeleteHandler,
};
use elasticdash_testing::EventBuilder;
use serde_json::json;
use tokio::runtime::Runtime;

fn sample_events(count: usize) -> Vec<AnalyticsEvent> {
    (0..count)
        .map(|i| match i % 3 {
            0 => EventBuilder::trace(format!("t{i}"))
                .user(format!("user-{}", i % 17))
                .user_url("https://cloud.elasticdash.com/project/p1/users/u")
                .session(format!("s{}", i % 5))
                .tags(["production", "checkout"])
                .build(),
            1 => EventBuilder::generation(format!("g{i}")).posthog_session("ph-session").build(),
            _ => EventBuilder::score(format!("s{i}"))
                .name("helpfulness")
                .value(0.5)
                .metadata(json!({ "reviewer": "bench" }))
                .build(),
        })
        .collect()
}

fn bench_transformers(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");

    for size in [1, 100, 1000] {
        let events = sample_events(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("posthog", size), &events, |b, events| {
            b.iter(|| {
                let payloads: Vec<_> =
                    events.iter().map(|event| posthog::transform(event, "p1")).collect();
                black_box(serde_json::to_vec(&payloads))
            });
        });

        group.bench_with_input(BenchmarkId::new("mixpanel", size), &events, |b, events| {
            b.iter(|| {
                let payloads: Vec<_> =
                    events.iter().map(|event| mixpanel::transform(event, "p1")).collect();
                black_box(serde_json::to_vec(&payloads))
            });
        });
    }

    group.finish();
}

fn bench_trace_delete_jobs(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    c.bench_function("dispatch_and_process_trace_delete", |b| {
        b.to_async(&rt).iter(|| async {
            let store = MockJobStore::new();
            let clock = Arc::new(TestClock::new());
            let reconciler = DeletionReconciler::new(
                Arc::new(MockExecutionStore::new()),
                Arc::new(NoOpErrorTracker),
            );
            let engine = ExportEngine::new(
                Arc::new(store.clone()),
                HandlerRegistry::new()
                    .with_handler(Arc::new(TraceDeleteHandler::new(Arc::new(reconciler)))),
                EngineConfig::default(),
                clock.clone(),
                Arc::new(NoOpErrorTracker),
            );
            let dispatcher = JobDispatcher::new(Arc::new(store), clock);

            for i in 0..10 {
                let payload = TraceDeleteJobPayload {
                    project_id: "p1".to_string(),
                    trace_ids: vec![format!("t{i}")],
                };
                dispatcher.enqueue(JobKind::TraceDeleteJob, &payload).await.expect("enqueue");
            }
            black_box(engine.process_batch().await.expect("process batch"))
        });
    });
}

criterion_group!(benches, bench_transformers, bench_trace_delete_jobs);
criterion_main!(benches);
