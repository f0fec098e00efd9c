//! Job dispatch and the metering retrigger.
//!
//! Dispatching only enqueues. Whatever consumes a job kind runs elsewhere,
//! possibly in another process, so the caller's only signal is the queue's
//! acknowledgment.

use std::{future::Future, sync::Arc};

use elasticdash_core::{Clock, JobId, JobKind, MeteringJobPayload, QueueJob};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::{ExportError, Result},
    storage::{JobStore, QueueConnector},
};

/// Enqueues named jobs on the durable queue.
#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobDispatcher {
    /// Creates a dispatcher writing to `store`.
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Enqueues one job of `kind` carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::InvalidPayload` if the payload cannot be
    /// serialized and `ExportError::Database` if the queue rejects the job.
    pub async fn enqueue<P: Serialize + ?Sized>(
        &self,
        kind: JobKind,
        payload: &P,
    ) -> Result<JobId> {
        let job = QueueJob::new(kind, serde_json::to_value(payload)?, self.clock.now_utc());

        match self.store.enqueue(job).await {
            Ok(job_id) => {
                info!(%job_id, kind = %kind, "job enqueued");
                Ok(job_id)
            },
            Err(e) => {
                warn!(kind = %kind, error = %e, "failed to enqueue job");
                Err(e.into())
            },
        }
    }

    /// Enqueues a job by queue name.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Configuration` if `name` is not a recognized job
    /// kind; nothing is enqueued in that case. Otherwise fails like
    /// [`JobDispatcher::enqueue`].
    pub async fn enqueue_named(&self, name: &str, payload: Value) -> Result<JobId> {
        let kind = name.parse::<JobKind>().map_err(|e| ExportError::configuration(e.to_string()))?;
        self.enqueue(kind, &payload).await
    }
}

/// Runs `operation` with a dispatcher over a freshly opened queue connection.
///
/// The connection is closed after `operation` finishes, whether it
/// succeeded or not.
///
/// # Errors
///
/// Returns the connect error, or whatever `operation` returned.
pub async fn with_queue<F, Fut, T>(
    connector: &dyn QueueConnector,
    clock: Arc<dyn Clock>,
    operation: F,
) -> Result<T>
where
    F: FnOnce(JobDispatcher) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let connection = connector.connect().await?;
    let dispatcher = JobDispatcher::new(connection.job_store(), clock);

    let result = operation(dispatcher).await;
    connection.close().await;
    result
}

/// Enqueues one usage metering job, outside the regular schedule.
///
/// Every call enqueues a new, independent job.
///
/// # Errors
///
/// Returns the connect or enqueue error. The connection is closed either
/// way.
pub async fn retrigger_metering(
    connector: &dyn QueueConnector,
    clock: Arc<dyn Clock>,
) -> Result<JobId> {
    with_queue(connector, clock, |dispatcher| async move {
        dispatcher.enqueue(JobKind::CloudUsageMeteringJob, &MeteringJobPayload::default()).await
    })
    .await
}
