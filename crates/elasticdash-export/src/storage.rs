//! Storage seams of the export pipeline.
//!
//! The worker, reconciler and dispatcher only see these traits. Production
//! adapters delegate to the `elasticdash_core::storage` repositories; the
//! [`mock`] module provides in-memory doubles with failure injection.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use elasticdash_core::{
    error::Result,
    models::{JobId, JobKind, QueueJob},
    storage::Storage,
    AnalyticsEvent, EventCursor, EventKind,
};
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Durable job queue operations.
pub trait JobStore: Send + Sync + 'static {
    /// Persists a new job; resolves once the queue acknowledged it.
    fn enqueue(&self, job: QueueJob) -> Pin<Box<dyn Future<Output = Result<JobId>> + Send + '_>>;

    /// Claims up to `batch_size` due jobs of the given kinds and marks them
    /// running until `locked_until`.
    ///
    /// Due jobs are pending ones whose `next_run_at` has been reached and
    /// running ones whose lease ended at or before `now`. Reclaiming an
    /// expired lease counts as one failed attempt.
    fn claim_due(
        &self,
        kinds: Vec<JobKind>,
        batch_size: usize,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueJob>>> + Send + '_>>;

    /// Returns claimed jobs that were never started to pending. Returns how
    /// many were released.
    fn release(&self, ids: Vec<JobId>) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Marks a job completed.
    fn mark_completed(&self, id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns a job to pending, due again at `next_run_at`.
    fn schedule_retry(
        &self,
        id: JobId,
        attempts: u32,
        next_run_at: DateTime<Utc>,
        error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks a job permanently failed.
    fn mark_failed(
        &self,
        id: JobId,
        attempts: u32,
        error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Dependent execution records keyed by trace.
pub trait ExecutionRecordStore: Send + Sync + 'static {
    /// Deletes the executions of `project_id` whose input trace is in
    /// `trace_ids` with one bulk statement. Returns the deleted row count.
    fn delete_by_trace_ids(
        &self,
        project_id: String,
        trace_ids: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;
}

/// Paged source of canonical events.
pub trait EventSource: Send + Sync + 'static {
    /// Up to `limit` events of `kind` for `project_id` with
    /// `from <= timestamp < to`, strictly after `after` in
    /// `(timestamp, id)` order.
    fn fetch_page(
        &self,
        project_id: String,
        kind: EventKind,
        window: (DateTime<Utc>, DateTime<Utc>),
        after: Option<EventCursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AnalyticsEvent>>> + Send + '_>>;
}

/// Postgres implementation of every storage seam.
#[derive(Clone)]
pub struct PostgresStorage {
    storage: Arc<Storage>,
}

impl PostgresStorage {
    /// Creates a new adapter over the core repositories.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl JobStore for PostgresStorage {
    fn enqueue(&self, job: QueueJob) -> Pin<Box<dyn Future<Output = Result<JobId>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_jobs.enqueue(&job).await })
    }

    fn claim_due(
        &self,
        kinds: Vec<JobKind>,
        batch_size: usize,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueJob>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.queue_jobs.claim_due(&kinds, batch_size, now, locked_until).await
        })
    }

    fn release(&self, ids: Vec<JobId>) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_jobs.release(&ids).await })
    }

    fn mark_completed(&self, id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_jobs.mark_completed(id).await })
    }

    fn schedule_retry(
        &self,
        id: JobId,
        attempts: u32,
        next_run_at: DateTime<Utc>,
        error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.queue_jobs.schedule_retry(id, to_i32(attempts), next_run_at, &error).await
        })
    }

    fn mark_failed(
        &self,
        id: JobId,
        attempts: u32,
        error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue_jobs.mark_failed(id, to_i32(attempts), &error).await })
    }
}

impl ExecutionRecordStore for PostgresStorage {
    fn delete_by_trace_ids(
        &self,
        project_id: String,
        trace_ids: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.job_executions.delete_by_trace_ids(&project_id, &trace_ids).await
        })
    }
}

impl EventSource for PostgresStorage {
    fn fetch_page(
        &self,
        project_id: String,
        kind: EventKind,
        (from, to): (DateTime<Utc>, DateTime<Utc>),
        after: Option<EventCursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AnalyticsEvent>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .analytics_events
                .find_page(&project_id, kind, from, to, after.as_ref(), limit)
                .await
        })
    }
}

/// An open connection to the job queue.
pub trait QueueConnection: Send + Sync {
    /// Queue operations over this connection.
    fn job_store(&self) -> Arc<dyn JobStore>;

    /// Releases the connection.
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Opens queue connections on demand.
pub trait QueueConnector: Send + Sync {
    /// Opens a new connection.
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn QueueConnection>>> + Send + '_>>;
}

/// Connects to the Postgres-backed queue.
#[derive(Debug, Clone)]
pub struct PgQueueConnector {
    database_url: String,
    max_connections: u32,
}

impl PgQueueConnector {
    /// Creates a connector for `database_url`.
    pub fn new(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self { database_url: database_url.into(), max_connections }
    }
}

impl QueueConnector for PgQueueConnector {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn QueueConnection>>> + Send + '_>> {
        Box::pin(async move {
            let pool = PgPoolOptions::new()
                .max_connections(self.max_connections)
                .connect(&self.database_url)
                .await?;
            let store = Arc::new(PostgresStorage::new(Arc::new(Storage::new(pool.clone()))));

            Ok(Box::new(PgQueueConnection { pool, store }) as Box<dyn QueueConnection>)
        })
    }
}

struct PgQueueConnection {
    pool: PgPool,
    store: Arc<PostgresStorage>,
}

impl QueueConnection for PgQueueConnection {
    fn job_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.pool.close().await })
    }
}

pub mod mock {
    //! In-memory storage doubles.
    //!
    //! Each mock records what it was asked to do and can be told to fail the
    //! next calls with a database error.

    use std::{
        collections::HashMap,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use chrono::{DateTime, Utc};
    use elasticdash_core::{
        error::{CoreError, Result},
        models::{JobId, JobKind, JobStatus, QueueJob},
        storage::queue_jobs::LEASE_EXPIRED_ERROR,
        AnalyticsEvent, CanonicalEvent, EventCursor, EventKind,
    };
    use tokio::sync::RwLock;

    use super::{EventSource, ExecutionRecordStore, JobStore, QueueConnection, QueueConnector};

    fn injected(error: &Option<String>) -> Result<()> {
        match error {
            Some(message) => Err(CoreError::Database(message.clone())),
            None => Ok(()),
        }
    }

    /// In-memory job queue.
    #[derive(Clone, Default)]
    pub struct MockJobStore {
        jobs: Arc<RwLock<Vec<QueueJob>>>,
        enqueue_error: Arc<RwLock<Option<String>>>,
        claim_error: Arc<RwLock<Option<String>>>,
    }

    impl MockJobStore {
        /// Creates an empty queue.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every following enqueue fail.
        pub async fn inject_enqueue_error(&self, message: impl Into<String>) {
            *self.enqueue_error.write().await = Some(message.into());
        }

        /// Makes every following claim fail.
        pub async fn inject_claim_error(&self, message: impl Into<String>) {
            *self.claim_error.write().await = Some(message.into());
        }

        /// Snapshot of every job in enqueue order.
        pub async fn jobs(&self) -> Vec<QueueJob> {
            self.jobs.read().await.clone()
        }

        /// Jobs currently in `status`.
        pub async fn jobs_with_status(&self, status: JobStatus) -> Vec<QueueJob> {
            self.jobs.read().await.iter().filter(|job| job.status == status).cloned().collect()
        }

        /// Current state of one job.
        pub async fn job(&self, id: JobId) -> Option<QueueJob> {
            self.jobs.read().await.iter().find(|job| job.id == id).cloned()
        }

        async fn update(&self, id: JobId, apply: impl FnOnce(&mut QueueJob)) -> Result<()> {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .iter_mut()
                .find(|job| job.id == id)
                .ok_or_else(|| CoreError::NotFound(format!("job {id} not found")))?;
            apply(job);
            Ok(())
        }
    }

    impl JobStore for MockJobStore {
        fn enqueue(
            &self,
            job: QueueJob,
        ) -> Pin<Box<dyn Future<Output = Result<JobId>> + Send + '_>> {
            Box::pin(async move {
                injected(&*self.enqueue_error.read().await)?;
                let id = job.id;
                self.jobs.write().await.push(job);
                Ok(id)
            })
        }

        fn claim_due(
            &self,
            kinds: Vec<JobKind>,
            batch_size: usize,
            now: DateTime<Utc>,
            locked_until: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueJob>>> + Send + '_>> {
            Box::pin(async move {
                injected(&*self.claim_error.read().await)?;

                let mut jobs = self.jobs.write().await;
                let claimed = jobs
                    .iter_mut()
                    .filter(|job| {
                        let due = job.status == JobStatus::Pending
                            && job.next_run_at.map_or(true, |at| at <= now);
                        kinds.contains(&job.name) && (due || job.lease_expired(now))
                    })
                    .take(batch_size)
                    .map(|job| {
                        if job.status == JobStatus::Running {
                            job.attempts = job.attempts.saturating_add(1);
                            job.last_error = Some(LEASE_EXPIRED_ERROR.to_string());
                        }
                        job.status = JobStatus::Running;
                        job.locked_until = Some(locked_until);
                        job.clone()
                    })
                    .collect();
                Ok(claimed)
            })
        }

        fn release(
            &self,
            ids: Vec<JobId>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            Box::pin(async move {
                let mut released = 0;
                for job in self.jobs.write().await.iter_mut() {
                    if ids.contains(&job.id) && job.status == JobStatus::Running {
                        job.status = JobStatus::Pending;
                        job.locked_until = None;
                        released += 1;
                    }
                }
                Ok(released)
            })
        }

        fn mark_completed(
            &self,
            id: JobId,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(self.update(id, |job| {
                job.status = JobStatus::Completed;
                job.locked_until = None;
            }))
        }

        fn schedule_retry(
            &self,
            id: JobId,
            attempts: u32,
            next_run_at: DateTime<Utc>,
            error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(self.update(id, move |job| {
                job.status = JobStatus::Pending;
                job.attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
                job.next_run_at = Some(next_run_at);
                job.last_error = Some(error);
                job.locked_until = None;
            }))
        }

        fn mark_failed(
            &self,
            id: JobId,
            attempts: u32,
            error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(self.update(id, move |job| {
                job.status = JobStatus::Failed;
                job.attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
                job.next_run_at = None;
                job.last_error = Some(error);
                job.locked_until = None;
            }))
        }
    }

    /// In-memory execution records as `(project_id, trace_id)` pairs.
    #[derive(Clone, Default)]
    pub struct MockExecutionStore {
        records: Arc<RwLock<Vec<(String, String)>>>,
        delete_calls: Arc<RwLock<Vec<(String, Vec<String>)>>>,
        delete_error: Arc<RwLock<Option<String>>>,
    }

    impl MockExecutionStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds one execution record.
        pub async fn add_record(&self, project_id: impl Into<String>, trace_id: impl Into<String>) {
            self.records.write().await.push((project_id.into(), trace_id.into()));
        }

        /// Makes every following delete fail.
        pub async fn inject_delete_error(&self, message: impl Into<String>) {
            *self.delete_error.write().await = Some(message.into());
        }

        /// Remaining records.
        pub async fn records(&self) -> Vec<(String, String)> {
            self.records.read().await.clone()
        }

        /// Every delete request received, including failed ones.
        pub async fn delete_calls(&self) -> Vec<(String, Vec<String>)> {
            self.delete_calls.read().await.clone()
        }
    }

    impl ExecutionRecordStore for MockExecutionStore {
        fn delete_by_trace_ids(
            &self,
            project_id: String,
            trace_ids: Vec<String>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            Box::pin(async move {
                self.delete_calls.write().await.push((project_id.clone(), trace_ids.clone()));
                injected(&*self.delete_error.read().await)?;

                let mut records = self.records.write().await;
                let before = records.len();
                records.retain(|(project, trace)| {
                    project != &project_id || !trace_ids.contains(trace)
                });
                Ok((before - records.len()) as u64)
            })
        }
    }

    /// In-memory canonical events per project.
    #[derive(Clone, Default)]
    pub struct MockEventSource {
        events: Arc<RwLock<HashMap<String, Vec<AnalyticsEvent>>>>,
        fetch_error: Arc<RwLock<Option<String>>>,
        page_requests: Arc<RwLock<Vec<(EventKind, usize)>>>,
    }

    impl MockEventSource {
        /// Creates an empty source.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds an event to `project_id`.
        pub async fn add_event(
            &self,
            project_id: impl Into<String>,
            event: impl Into<AnalyticsEvent>,
        ) {
            self.events.write().await.entry(project_id.into()).or_default().push(event.into());
        }

        /// Makes every following fetch fail.
        pub async fn inject_fetch_error(&self, message: impl Into<String>) {
            *self.fetch_error.write().await = Some(message.into());
        }

        /// Kind and size of every page served, in order.
        pub async fn page_requests(&self) -> Vec<(EventKind, usize)> {
            self.page_requests.read().await.clone()
        }
    }

    impl EventSource for MockEventSource {
        fn fetch_page(
            &self,
            project_id: String,
            kind: EventKind,
            (from, to): (DateTime<Utc>, DateTime<Utc>),
            after: Option<EventCursor>,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<AnalyticsEvent>>> + Send + '_>> {
            Box::pin(async move {
                injected(&*self.fetch_error.read().await)?;

                let key = |event: &AnalyticsEvent| (event.timestamp(), event.id().to_string());
                let events = self.events.read().await;
                let mut page: Vec<AnalyticsEvent> = events
                    .get(&project_id)
                    .into_iter()
                    .flatten()
                    .filter(|event| {
                        event.kind() == kind
                            && event.timestamp() >= from
                            && event.timestamp() < to
                            && after.as_ref().map_or(true, |cursor| {
                                key(event) > (cursor.timestamp, cursor.id.clone())
                            })
                    })
                    .cloned()
                    .collect();
                page.sort_by_key(key);
                page.truncate(limit);

                self.page_requests.write().await.push((kind, page.len()));
                Ok(page)
            })
        }
    }

    /// Connector handing out connections to one shared [`MockJobStore`].
    #[derive(Clone, Default)]
    pub struct MockQueueConnector {
        store: MockJobStore,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        connect_error: Arc<RwLock<Option<String>>>,
    }

    impl MockQueueConnector {
        /// Creates a connector over `store`.
        pub fn new(store: MockJobStore) -> Self {
            Self { store, ..Self::default() }
        }

        /// Makes every following connect fail.
        pub async fn inject_connect_error(&self, message: impl Into<String>) {
            *self.connect_error.write().await = Some(message.into());
        }

        /// Number of connections opened so far.
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        /// Number of connections closed so far.
        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct MockQueueConnection {
        store: MockJobStore,
        closed: Arc<AtomicUsize>,
    }

    impl QueueConnection for MockQueueConnection {
        fn job_store(&self) -> Arc<dyn JobStore> {
            Arc::new(self.store.clone())
        }

        fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    impl QueueConnector for MockQueueConnector {
        fn connect(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn QueueConnection>>> + Send + '_>> {
            Box::pin(async move {
                injected(&*self.connect_error.read().await)?;
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockQueueConnection {
                    store: self.store.clone(),
                    closed: self.closed.clone(),
                }) as Box<dyn QueueConnection>)
            })
        }
    }
}
