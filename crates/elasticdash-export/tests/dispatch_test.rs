//! Job dispatch and metering retrigger over the in-memory queue.

use std::sync::Arc;

use elasticdash_core::{
    Clock, JobKind, JobStatus, MeteringJobPayload, TestClock, TraceDeleteJobPayload,
};
use elasticdash_export::{
    retrigger_metering,
    storage::mock::{MockJobStore, MockQueueConnector},
    with_queue, ExportError,
};
use serde_json::json;

#[tokio::test]
async fn retrigger_enqueues_one_metering_job_and_releases_connection() {
    let store = MockJobStore::new();
    let connector = MockQueueConnector::new(store.clone());
    let clock = TestClock::new();

    let job_id = retrigger_metering(&connector, Arc::new(clock.clone())).await.unwrap();

    let jobs = store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, job_id);
    assert_eq!(jobs[0].name, JobKind::CloudUsageMeteringJob);
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert_eq!(jobs[0].created_at, clock.now_utc());
    assert_eq!(
        jobs[0].decode_payload::<MeteringJobPayload>().unwrap(),
        MeteringJobPayload::default()
    );
    assert_eq!((connector.opened(), connector.closed()), (1, 1));
}

#[tokio::test]
async fn every_retrigger_is_a_new_job() {
    let store = MockJobStore::new();
    let connector = MockQueueConnector::new(store.clone());

    let first = retrigger_metering(&connector, Arc::new(TestClock::new())).await.unwrap();
    let second = retrigger_metering(&connector, Arc::new(TestClock::new())).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(store.jobs_with_status(JobStatus::Pending).await.len(), 2);
}

#[tokio::test]
async fn connect_failure_enqueues_nothing() {
    let store = MockJobStore::new();
    let connector = MockQueueConnector::new(store.clone());
    connector.inject_connect_error("connection refused").await;

    let error = retrigger_metering(&connector, Arc::new(TestClock::new())).await.unwrap_err();

    assert!(error.is_retryable());
    assert!(store.jobs().await.is_empty());
    assert_eq!(connector.closed(), 0);
}

#[tokio::test]
async fn scoped_queue_is_released_after_operation_error() {
    let store = MockJobStore::new();
    let connector = MockQueueConnector::new(store.clone());

    let result = with_queue(&connector, Arc::new(TestClock::new()), |dispatcher| async move {
        dispatcher.enqueue_named("nightly-rollup", json!({})).await
    })
    .await;

    assert!(matches!(result, Err(ExportError::Configuration { .. })));
    assert!(store.jobs().await.is_empty());
    assert_eq!((connector.opened(), connector.closed()), (1, 1));
}

#[tokio::test]
async fn trace_delete_jobs_round_trip_their_payload() {
    let store = MockJobStore::new();
    let connector = MockQueueConnector::new(store.clone());
    let payload = TraceDeleteJobPayload {
        project_id: "p1".to_string(),
        trace_ids: vec!["t1".to_string(), "t2".to_string()],
    };

    let job_id = with_queue(&connector, Arc::new(TestClock::new()), |dispatcher| {
        let payload = payload.clone();
        async move { dispatcher.enqueue(JobKind::TraceDeleteJob, &payload).await }
    })
    .await
    .unwrap();

    let job = store.job(job_id).await.unwrap();
    assert_eq!(job.decode_payload::<TraceDeleteJobPayload>().unwrap(), payload);
}
