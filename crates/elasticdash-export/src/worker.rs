//! Queue workers.
//!
//! Each worker claims due jobs of the kinds it has handlers for, runs them,
//! and records the outcome on the queue:
//!
//! - success marks the job completed
//! - a retryable failure with attempts left reschedules it with backoff
//! - anything else fails it permanently, logs at `error` and captures the
//!   error through the error tracker
//!
//! Claims hold a lease of `claim_lease`. Jobs claimed but not yet started
//! when the worker is cancelled go back to pending. Jobs whose lease runs out
//! while still `running` are claimed again by any worker, and a job whose
//! attempts were all consumed that way is failed and captured.

use std::{sync::Arc, time::Duration};

use elasticdash_core::{Clock, ErrorTracker, JobId, QueueJob};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::ClientConfig,
    error::{ErrorCategory, ExportError, Result},
    handlers::HandlerRegistry,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    storage::JobStore,
    worker_pool::WorkerPool,
};

/// Configuration of the worker engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// Maximum jobs claimed per poll.
    pub batch_size: usize,

    /// Maximum events sent per destination request.
    pub export_batch_size: usize,

    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,

    /// Destination HTTP client configuration.
    pub client_config: ClientConfig,

    /// Retry policy for failed jobs.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers on shutdown.
    pub shutdown_timeout: Duration,

    /// How long a claimed job stays reserved for its worker.
    pub claim_lease: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            export_batch_size: crate::DEFAULT_EXPORT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
            claim_lease: Duration::from_secs(crate::DEFAULT_CLAIM_LEASE_SECONDS),
        }
    }
}

/// Counters of the engine since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of running workers.
    pub active_workers: usize,
    /// Jobs executed, whatever the outcome.
    pub jobs_processed: u64,
    /// Jobs completed.
    pub jobs_completed: u64,
    /// Failed executions that were rescheduled.
    pub jobs_retried: u64,
    /// Jobs failed permanently.
    pub jobs_failed: u64,
    /// Jobs currently executing.
    pub in_flight_jobs: u64,
}

/// Worker engine coordinating the queue workers.
pub struct ExportEngine {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    config: EngineConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
    tracker: Arc<dyn ErrorTracker>,
}

impl ExportEngine {
    /// Creates an engine over `store` running the jobs `handlers` know.
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: HandlerRegistry,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        tracker: Arc<dyn ErrorTracker>,
    ) -> Self {
        Self {
            store,
            handlers: Arc::new(handlers),
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
            tracker,
        }
    }

    /// Spawns the workers and returns.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Configuration` if no handler is registered.
    pub async fn start(&mut self) -> Result<()> {
        if self.handlers.is_empty() {
            return Err(ExportError::configuration("no job handlers registered"));
        }

        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            kinds = ?self.handlers.kinds(),
            "starting export engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.config.worker_count,
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        worker_pool.spawn_workers(|id| self.worker(id)).await;
        self.worker_pool = Some(worker_pool);

        Ok(())
    }

    /// Stops the workers, letting in-flight jobs finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the workers do not stop within the shutdown
    /// timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down export engine");

        match self.worker_pool.take() {
            Some(worker_pool) => worker_pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => {
                info!("export engine was not started, nothing to stop");
                Ok(())
            },
        }
    }

    /// Current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Claims and runs one batch on the calling task.
    ///
    /// Returns the number of jobs processed.
    ///
    /// # Errors
    ///
    /// Returns an error if claiming fails.
    pub async fn process_batch(&self) -> Result<usize> {
        self.worker(0).process_batch().await
    }

    fn worker(&self, id: usize) -> JobWorker {
        JobWorker {
            id,
            store: self.store.clone(),
            handlers: self.handlers.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            cancellation_token: self.cancellation_token.clone(),
            clock: self.clock.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

/// A single queue worker.
pub struct JobWorker {
    id: usize,
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    config: EngineConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
    tracker: Arc<dyn ErrorTracker>,
}

impl JobWorker {
    /// Claims and runs jobs until cancelled.
    pub async fn run(&self) {
        info!(worker_id = self.id, "job worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let idle = match self.process_batch().await {
                Ok(processed) => (processed == 0).then_some(self.config.poll_interval),
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "worker batch processing failed");
                    Some(Duration::from_secs(5))
                },
            };

            if let Some(wait) = idle {
                tokio::select! {
                    () = self.clock.sleep(wait) => {},
                    () = self.cancellation_token.cancelled() => break,
                }
            }
        }

        info!(worker_id = self.id, "job worker stopped");
    }

    async fn process_batch(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let locked_until = chrono::Duration::from_std(self.config.claim_lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .ok_or_else(|| ExportError::configuration("claim lease out of range"))?;

        let jobs = self
            .store
            .claim_due(self.handlers.kinds(), self.config.batch_size, now, locked_until)
            .await
            .map_err(|e| ExportError::database(format!("failed to claim jobs: {e}")))?;
        let claimed = jobs.len();

        if claimed > 0 {
            debug!(worker_id = self.id, claimed, %locked_until, "claimed jobs");
        }

        let mut jobs = jobs.into_iter();
        while let Some(job) = jobs.next() {
            if self.cancellation_token.is_cancelled() {
                let unstarted =
                    std::iter::once(job.id).chain(jobs.by_ref().map(|job| job.id)).collect();
                self.release(unstarted).await;
                break;
            }
            self.process_job(job).await;
        }

        Ok(claimed)
    }

    async fn release(&self, ids: Vec<JobId>) {
        let unstarted = ids.len();
        match self.store.release(ids).await {
            Ok(released) => {
                info!(worker_id = self.id, unstarted, released, "released unstarted jobs");
            },
            Err(e) => warn!(
                worker_id = self.id,
                unstarted,
                error = %e,
                "failed to release unstarted jobs, they are reclaimed after their lease"
            ),
        }
    }

    async fn process_job(&self, job: QueueJob) {
        self.stats.write().await.in_flight_jobs += 1;

        let recorded = if job.next_attempt() > self.config.retry_policy.max_attempts {
            self.abandon(&job).await
        } else {
            let result = match self.handlers.get(job.name) {
                Some(handler) => handler.handle(&job).await,
                None => Err(ExportError::configuration(format!(
                    "no handler for job kind {}",
                    job.name
                ))),
            };
            match result {
                Ok(()) => self.complete(&job).await,
                Err(e) => self.fail(&job, e).await,
            }
        };
        if let Err(e) = recorded {
            error!(
                worker_id = self.id,
                job_id = %job.id,
                error = %e,
                "failed to record job outcome, job is reclaimed after its lease"
            );
        }

        let mut stats = self.stats.write().await;
        stats.in_flight_jobs -= 1;
        stats.jobs_processed += 1;
    }

    async fn complete(&self, job: &QueueJob) -> Result<()> {
        self.store.mark_completed(job.id).await?;
        self.stats.write().await.jobs_completed += 1;

        info!(worker_id = self.id, job_id = %job.id, kind = %job.name, "job completed");
        Ok(())
    }

    async fn fail(&self, job: &QueueJob, e: ExportError) -> Result<()> {
        let attempt = job.next_attempt();
        let policy = self.config.retry_policy.clone();
        let context = RetryContext::new(attempt, e.clone(), self.clock.now_utc(), policy);

        match context.decide_retry() {
            RetryDecision::Retry { next_attempt_at } => {
                warn!(
                    worker_id = self.id,
                    job_id = %job.id,
                    kind = %job.name,
                    attempt,
                    category = %ErrorCategory::from(&e),
                    error = %e,
                    %next_attempt_at,
                    "job failed, retry scheduled"
                );
                self.store.schedule_retry(job.id, attempt, next_attempt_at, e.to_string()).await?;
                self.stats.write().await.jobs_retried += 1;
                Ok(())
            },
            RetryDecision::GiveUp { reason } => self.give_up(job, &e, attempt, &reason).await,
        }
    }

    /// Fails a reclaimed job whose last attempt ended with an expired lease.
    async fn abandon(&self, job: &QueueJob) -> Result<()> {
        let attempts = u32::try_from(job.attempts).unwrap_or(0);
        let e = ExportError::LeaseExpired { attempts };
        self.give_up(job, &e, attempts, "no attempts left").await
    }

    async fn give_up(
        &self,
        job: &QueueJob,
        e: &ExportError,
        attempt: u32,
        reason: &str,
    ) -> Result<()> {
        error!(
            worker_id = self.id,
            job_id = %job.id,
            kind = %job.name,
            attempt,
            category = %ErrorCategory::from(e),
            error = %e,
            reason,
            "job failed permanently"
        );
        self.tracker.capture(e);
        self.store.mark_failed(job.id, attempt, e.to_string()).await?;
        self.stats.write().await.jobs_failed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use elasticdash_core::{JobKind, JobStatus, NoOpErrorTracker, TestClock};
    use elasticdash_testing::RecordingErrorTracker;
    use serde_json::json;

    use super::*;
    use crate::{handlers::JobHandler, storage::mock::MockJobStore};

    struct ScriptedHandler {
        failure: Option<ExportError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedHandler {
        fn new(failure: Option<ExportError>) -> Arc<Self> {
            Self::slow(failure, Duration::ZERO)
        }

        fn slow(failure: Option<ExportError>, delay: Duration) -> Arc<Self> {
            Arc::new(Self { failure, delay, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        fn kind(&self) -> JobKind {
            JobKind::TraceDeleteJob
        }

        async fn handle(&self, _job: &QueueJob) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.failure.clone().map_or(Ok(()), Err)
        }
    }

    fn engine(
        store: &MockJobStore,
        handler: Arc<ScriptedHandler>,
        config: EngineConfig,
    ) -> ExportEngine {
        engine_with_clock(store, handler, config, TestClock::new())
    }

    fn engine_with_clock(
        store: &MockJobStore,
        handler: Arc<ScriptedHandler>,
        config: EngineConfig,
        clock: TestClock,
    ) -> ExportEngine {
        ExportEngine::new(
            Arc::new(store.clone()),
            HandlerRegistry::new().with_handler(handler),
            config,
            Arc::new(clock),
            Arc::new(NoOpErrorTracker),
        )
    }

    async fn enqueue(store: &MockJobStore, kind: JobKind) -> elasticdash_core::JobId {
        store.enqueue(QueueJob::new(kind, json!({}), chrono::Utc::now())).await.unwrap()
    }

    #[tokio::test]
    async fn start_without_handlers_is_rejected() {
        let mut engine = ExportEngine::new(
            Arc::new(MockJobStore::new()),
            HandlerRegistry::new(),
            EngineConfig::default(),
            Arc::new(TestClock::new()),
            Arc::new(NoOpErrorTracker),
        );

        let error = engine.start().await.unwrap_err();

        assert!(matches!(error, ExportError::Configuration { .. }));
    }

    #[tokio::test]
    async fn start_and_shutdown_track_active_workers() {
        let store = MockJobStore::new();
        let config = EngineConfig { worker_count: 2, ..EngineConfig::default() };
        let mut engine = engine(&store, ScriptedHandler::new(None), config);

        engine.start().await.unwrap();
        assert_eq!(engine.stats().await.active_workers, 2);

        let stats = engine.stats.clone();
        engine.shutdown().await.unwrap();
        assert_eq!(stats.read().await.active_workers, 0);
    }

    #[tokio::test]
    async fn successful_job_is_completed() {
        let store = MockJobStore::new();
        let id = enqueue(&store, JobKind::TraceDeleteJob).await;
        let engine = engine(&store, ScriptedHandler::new(None), EngineConfig::default());

        assert_eq!(engine.process_batch().await.unwrap(), 1);

        assert_eq!(store.job(id).await.unwrap().status, JobStatus::Completed);
        let stats = engine.stats().await;
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.in_flight_jobs, 0);
    }

    #[tokio::test]
    async fn jobs_without_handler_are_left_queued() {
        let store = MockJobStore::new();
        let id = enqueue(&store, JobKind::CloudUsageMeteringJob).await;
        let engine = engine(&store, ScriptedHandler::new(None), EngineConfig::default());

        assert_eq!(engine.process_batch().await.unwrap(), 0);

        assert_eq!(store.job(id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn transient_failure_is_rescheduled() {
        let store = MockJobStore::new();
        let id = enqueue(&store, JobKind::TraceDeleteJob).await;
        let handler = ScriptedHandler::new(Some(ExportError::server_error(503, "unavailable")));
        let engine = engine(&store, handler.clone(), EngineConfig::default());

        engine.process_batch().await.unwrap();

        let job = store.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_run_at.is_some());
        assert!(job.last_error.unwrap().contains("503"));
        assert_eq!(engine.stats().await.jobs_retried, 1);

        // Not due yet on the unchanged clock.
        assert_eq!(engine.process_batch().await.unwrap(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_failure_fails_job_immediately() {
        let store = MockJobStore::new();
        let id = enqueue(&store, JobKind::TraceDeleteJob).await;
        let handler =
            ScriptedHandler::new(Some(ExportError::invalid_payload("missing project_id")));
        let engine = engine(&store, handler, EngineConfig::default());

        engine.process_batch().await.unwrap();

        let job = store.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(engine.stats().await.jobs_failed, 1);
    }

    #[tokio::test]
    async fn claim_failure_is_reported_as_database_error() {
        let store = MockJobStore::new();
        store.inject_claim_error("pool exhausted").await;
        let engine = engine(&store, ScriptedHandler::new(None), EngineConfig::default());

        let error = engine.process_batch().await.unwrap_err();

        assert!(matches!(error, ExportError::Database { .. }));
        assert!(error.to_string().contains("pool exhausted"));
    }

    #[tokio::test]
    async fn shutdown_hands_unstarted_claims_back_to_the_queue() {
        let store = MockJobStore::new();
        for _ in 0..3 {
            enqueue(&store, JobKind::TraceDeleteJob).await;
        }
        let handler = ScriptedHandler::slow(None, Duration::from_millis(200));
        let config = EngineConfig { worker_count: 1, ..EngineConfig::default() };
        let mut engine = engine(&store, handler.clone(), config.clone());

        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown().await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.jobs_with_status(JobStatus::Completed).await.len(), 1);
        assert!(store.jobs_with_status(JobStatus::Running).await.is_empty());
        let pending = store.jobs_with_status(JobStatus::Pending).await;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|job| job.locked_until.is_none() && job.attempts == 0));

        let restarted =
            engine_with_clock(&store, ScriptedHandler::new(None), config, TestClock::new());
        assert_eq!(restarted.process_batch().await.unwrap(), 2);
        assert_eq!(store.jobs_with_status(JobStatus::Completed).await.len(), 3);
    }

    #[tokio::test]
    async fn claims_of_a_crashed_worker_are_retried_after_the_lease() {
        let clock = TestClock::new();
        let store = MockJobStore::new();
        let id = enqueue(&store, JobKind::TraceDeleteJob).await;
        let lease = chrono::Duration::minutes(10);
        store
            .claim_due(vec![JobKind::TraceDeleteJob], 10, clock.now_utc(), clock.now_utc() + lease)
            .await
            .unwrap();
        let handler = ScriptedHandler::new(None);
        let config =
            EngineConfig { claim_lease: Duration::from_secs(600), ..EngineConfig::default() };
        let engine = engine_with_clock(&store, handler.clone(), config, clock.clone());

        assert_eq!(engine.process_batch().await.unwrap(), 0);

        clock.advance(Duration::from_secs(600));
        assert_eq!(engine.process_batch().await.unwrap(), 1);

        let job = store.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn job_whose_attempts_all_expired_is_failed_and_captured() {
        let clock = TestClock::new();
        let store = MockJobStore::new();
        let job = QueueJob {
            status: JobStatus::Running,
            attempts: 1,
            locked_until: Some(clock.now_utc()),
            ..QueueJob::new(JobKind::TraceDeleteJob, json!({}), clock.now_utc())
        };
        store.enqueue(job.clone()).await.unwrap();
        let tracker = RecordingErrorTracker::new();
        let handler = ScriptedHandler::new(None);
        let mut config = EngineConfig::default();
        config.retry_policy.max_attempts = 2;
        let engine = ExportEngine::new(
            Arc::new(store.clone()),
            HandlerRegistry::new().with_handler(handler.clone()),
            config,
            Arc::new(clock),
            Arc::new(tracker.clone()),
        );

        assert_eq!(engine.process_batch().await.unwrap(), 1);

        let failed = store.job(job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert!(failed.last_error.unwrap().contains("claim lease expired"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.count(), 1);
        assert_eq!(engine.stats().await.jobs_failed, 1);
    }
}
