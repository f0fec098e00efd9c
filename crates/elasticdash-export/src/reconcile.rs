//! Removal of execution records that depend on deleted traces.

use std::sync::Arc;

use elasticdash_core::ErrorTracker;
use tracing::{debug, error};

use crate::{
    error::{ExportError, Result},
    storage::ExecutionRecordStore,
};

/// Deletes dependent execution records when traces are deleted.
///
/// Each call issues exactly one bulk delete scoped to the project. Deleting
/// ids that have no records succeeds and removes nothing, so a retried job
/// converges to the same state.
pub struct DeletionReconciler {
    store: Arc<dyn ExecutionRecordStore>,
    tracker: Arc<dyn ErrorTracker>,
}

impl DeletionReconciler {
    /// Creates a reconciler over `store` reporting failures to `tracker`.
    pub fn new(store: Arc<dyn ExecutionRecordStore>, tracker: Arc<dyn ErrorTracker>) -> Self {
        Self { store, tracker }
    }

    /// Deletes the execution records of `project_id` that reference any of
    /// `trace_ids`.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Database` if the delete fails. The failure is
    /// logged with the trace ids and project and captured by the error
    /// tracker before it is returned.
    pub async fn reconcile_deletion(&self, project_id: &str, trace_ids: &[String]) -> Result<u64> {
        match self.store.delete_by_trace_ids(project_id.to_string(), trace_ids.to_vec()).await {
            Ok(deleted) => {
                debug!(
                    project_id,
                    traces = trace_ids.len(),
                    deleted,
                    "removed dependent job executions"
                );
                Ok(deleted)
            },
            Err(e) => {
                error!(
                    project_id,
                    trace_ids = ?trace_ids,
                    error = %e,
                    "failed to delete job executions for traces {} in project {}",
                    trace_ids.join(", "),
                    project_id
                );
                let error = ExportError::from(e);
                self.tracker.capture(&error);
                Err(error)
            },
        }
    }
}
