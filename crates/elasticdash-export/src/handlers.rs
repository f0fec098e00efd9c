//! Job handlers run by the worker.
//!
//! A worker only claims job kinds it has a handler for. Usage metering jobs
//! are consumed by a separate service and have no handler here.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use elasticdash_core::{
    EventCursor, EventKind, ExportJobPayload, JobKind, QueueJob, TraceDeleteJobPayload,
};
use tracing::{debug, info};

use crate::{
    destination::Destination,
    error::{ExportError, Result},
    reconcile::DeletionReconciler,
    storage::EventSource,
};

/// Executes claimed jobs of one kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job kind this handler executes.
    fn kind(&self) -> JobKind;

    /// Runs one job to completion.
    async fn handle(&self, job: &QueueJob) -> Result<()>;
}

/// Exports a project's events of one time window to a destination.
///
/// The window is read one page of `batch_size` events at a time, kind by
/// kind, and every page is sent as one destination request.
pub struct ExportJobHandler {
    destination: Arc<dyn Destination>,
    source: Arc<dyn EventSource>,
    batch_size: usize,
}

impl ExportJobHandler {
    /// Creates an export handler sending at most `batch_size` events per
    /// request.
    pub fn new(
        destination: Arc<dyn Destination>,
        source: Arc<dyn EventSource>,
        batch_size: usize,
    ) -> Self {
        Self { destination, source, batch_size: batch_size.max(1) }
    }
}

#[async_trait]
impl JobHandler for ExportJobHandler {
    fn kind(&self) -> JobKind {
        self.destination.job_kind()
    }

    async fn handle(&self, job: &QueueJob) -> Result<()> {
        let payload: ExportJobPayload = job.decode_payload()?;
        if payload.from >= payload.to {
            return Err(ExportError::invalid_payload(format!(
                "empty export window: {} >= {}",
                payload.from, payload.to
            )));
        }

        let window = (payload.from, payload.to);
        let mut sent = 0;
        for kind in EventKind::ALL {
            let mut after: Option<EventCursor> = None;
            loop {
                let page = self
                    .source
                    .fetch_page(payload.project_id.clone(), kind, window, after, self.batch_size)
                    .await?;
                if page.is_empty() {
                    break;
                }

                sent += self.destination.send_batch(&payload.project_id, &page).await?;
                debug!(destination = self.destination.name(), %kind, sent, "batch sent");

                if page.len() < self.batch_size {
                    break;
                }
                after = page.last().map(EventCursor::after);
            }
        }

        info!(
            job_id = %job.id,
            destination = self.destination.name(),
            project_id = %payload.project_id,
            events = sent,
            "export completed"
        );
        Ok(())
    }
}

/// Removes execution records of deleted traces.
pub struct TraceDeleteHandler {
    reconciler: Arc<DeletionReconciler>,
}

impl TraceDeleteHandler {
    /// Creates a handler delegating to `reconciler`.
    pub fn new(reconciler: Arc<DeletionReconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl JobHandler for TraceDeleteHandler {
    fn kind(&self) -> JobKind {
        JobKind::TraceDeleteJob
    }

    async fn handle(&self, job: &QueueJob) -> Result<()> {
        let payload: TraceDeleteJobPayload = job.decode_payload()?;
        self.reconciler.reconcile_deletion(&payload.project_id, &payload.trace_ids).await?;
        Ok(())
    }
}

/// Handlers by job kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for its kind, replacing any previous one.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Handler of `kind`, if registered.
    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, in a stable order.
    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL.into_iter().filter(|kind| self.handlers.contains_key(kind)).collect()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
