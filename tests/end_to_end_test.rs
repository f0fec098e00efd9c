//! Workspace-level scenarios: jobs dispatched through the queue connector
//! are picked up by the worker engine and delivered to wiremock
//! destinations.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use elasticdash_core::{
    Clock, ExportJobPayload, JobKind, JobStatus, TestClock, TraceDeleteJobPayload, TraceEvent,
};
use elasticdash_export::{
    client::DestinationClient,
    retrigger_metering,
    storage::mock::{MockEventSource, MockExecutionStore, MockJobStore, MockQueueConnector},
    with_queue, DeletionReconciler, EngineConfig, ExportEngine, ExportJobHandler, HandlerRegistry,
    PostHogDestination, TraceDeleteHandler,
};
use elasticdash_testing::{
    http::POSTHOG_BATCH_PATH, DestinationServer, LogCapture, RecordingErrorTracker,
};
use serde_json::json;

/// PostHog UUIDv5 of project `p1`, event `e1`.
const POSTHOG_P1_E1: &str = "cf7b35c2-0e1c-57d9-ae13-3eb4e655d6c7";

struct Worker {
    store: MockJobStore,
    connector: MockQueueConnector,
    source: MockEventSource,
    executions: MockExecutionStore,
    tracker: RecordingErrorTracker,
    clock: TestClock,
    engine: ExportEngine,
}

fn worker(server: &DestinationServer) -> Worker {
    let store = MockJobStore::new();
    let connector = MockQueueConnector::new(store.clone());
    let source = MockEventSource::new();
    let executions = MockExecutionStore::new();
    let tracker = RecordingErrorTracker::new();
    let clock = TestClock::with_start_time(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());

    let client = DestinationClient::with_defaults().unwrap();
    let posthog = PostHogDestination::new(client, server.url(), Some("phc_e2e".to_string()));
    let reconciler =
        DeletionReconciler::new(Arc::new(executions.clone()), Arc::new(tracker.clone()));
    let exporter = ExportJobHandler::new(Arc::new(posthog), Arc::new(source.clone()), 100);
    let handlers = HandlerRegistry::new()
        .with_handler(Arc::new(exporter))
        .with_handler(Arc::new(TraceDeleteHandler::new(Arc::new(reconciler))));

    let engine = ExportEngine::new(
        Arc::new(store.clone()),
        handlers,
        EngineConfig::default(),
        Arc::new(clock.clone()),
        Arc::new(tracker.clone()),
    );

    Worker { store, connector, source, executions, tracker, clock, engine }
}

fn new_year_trace(user_id: Option<&str>) -> TraceEvent {
    TraceEvent {
        user_id: user_id.map(str::to_string),
        user_url: Some("https://x".to_string()),
        ..TraceEvent::new("e1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }
}

async fn export_window(worker: &Worker) {
    let payload = ExportJobPayload {
        project_id: "p1".to_string(),
        from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        to: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
    };
    with_queue(&worker.connector, Arc::new(worker.clock.clone()), |dispatcher| async move {
        dispatcher.enqueue(JobKind::PostHogIntegrationJob, &payload).await
    })
    .await
    .unwrap();

    assert_eq!(worker.engine.process_batch().await.unwrap(), 1);
}

#[tokio::test]
async fn identified_trace_reaches_posthog_with_profile_update() {
    let server = DestinationServer::start().await;
    server.accept_all().await;
    let worker = worker(&server);
    worker.source.add_event("p1", new_year_trace(Some("u9"))).await;

    export_window(&worker).await;

    let bodies = server.bodies(POSTHOG_BATCH_PATH).await;
    let capture = &bodies[0]["batch"][0];
    assert_eq!(capture["distinct_id"], json!("u9"));
    assert_eq!(capture["properties"]["$set"], json!({ "elasticdash_user_url": "https://x" }));
    assert_eq!(capture["uuid"], json!(POSTHOG_P1_E1));
    assert_eq!(worker.store.jobs_with_status(JobStatus::Completed).await.len(), 1);
}

#[tokio::test]
async fn anonymous_trace_reaches_posthog_without_profile() {
    let server = DestinationServer::start().await;
    server.accept_all().await;
    let worker = worker(&server);
    worker.source.add_event("p1", new_year_trace(None)).await;

    export_window(&worker).await;

    let bodies = server.bodies(POSTHOG_BATCH_PATH).await;
    let capture = &bodies[0]["batch"][0];
    assert_eq!(capture["distinct_id"], json!(POSTHOG_P1_E1));
    assert_eq!(capture["uuid"], json!(POSTHOG_P1_E1));
    assert_eq!(capture["properties"]["$process_person_profile"], json!(false));
    assert!(capture["properties"].get("$set").is_none());
}

#[tokio::test]
async fn reexport_produces_identical_payloads() {
    let server = DestinationServer::start().await;
    server.accept_all().await;
    let worker = worker(&server);
    worker.source.add_event("p1", new_year_trace(Some("u9"))).await;

    export_window(&worker).await;
    export_window(&worker).await;

    let bodies = server.bodies(POSTHOG_BATCH_PATH).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn failing_trace_deletion_is_logged_captured_and_retried() {
    let logs = LogCapture::new();
    let _guard = logs.set_default();
    let server = DestinationServer::start().await;
    let worker = worker(&server);
    worker.executions.inject_delete_error("could not serialize access").await;

    let payload = TraceDeleteJobPayload {
        project_id: "p1".to_string(),
        trace_ids: vec!["t1".to_string(), "t2".to_string()],
    };
    let clock = Arc::new(worker.clock.clone());
    let job_id = with_queue(&worker.connector, clock, |dispatcher| async move {
        dispatcher.enqueue(JobKind::TraceDeleteJob, &payload).await
    })
    .await
    .unwrap();

    worker.engine.process_batch().await.unwrap();

    let job = worker.store.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending, "failure must surface to the queue");
    assert!(job.next_run_at.unwrap() > worker.clock.now_utc() - Duration::seconds(1));
    assert_eq!(worker.tracker.count(), 1);
    assert_eq!(logs.lines_with(&["ERROR", "t1, t2", "p1"]).len(), 1, "{}", logs.contents());
}

#[tokio::test]
async fn retriggered_metering_job_waits_for_its_own_consumer() {
    let server = DestinationServer::start().await;
    let worker = worker(&server);

    let clock = Arc::new(worker.clock.clone());
    let job_id = retrigger_metering(&worker.connector, clock).await.unwrap();

    assert_eq!(worker.engine.process_batch().await.unwrap(), 0);
    let job = worker.store.job(job_id).await.unwrap();
    assert_eq!(job.name, JobKind::CloudUsageMeteringJob);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!((worker.connector.opened(), worker.connector.closed()), (1, 1));
}
