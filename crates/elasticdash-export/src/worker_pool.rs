//! Supervised worker tasks with graceful shutdown.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{ExportError, Result},
    worker::{EngineStats, JobWorker},
};

/// Owns the spawned queue workers.
///
/// All workers share one cancellation token. Shutdown cancels it and waits
/// for every worker to finish its current job.
pub struct WorkerPool {
    worker_count: usize,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool of `worker_count` workers, none spawned yet.
    pub fn new(
        worker_count: usize,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { worker_count, stats, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns the workers built by `make_worker` and returns immediately.
    pub async fn spawn_workers(&mut self, make_worker: impl Fn(usize) -> JobWorker) {
        info!(worker_count = self.worker_count, "spawning job workers");

        self.stats.write().await.active_workers = self.worker_count;

        for worker_id in 0..self.worker_count {
            let worker = make_worker(worker_id);
            self.worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(spawned_workers = self.worker_handles.len(), "all job workers spawned");
    }

    /// Cancels the workers and waits up to `timeout` for them to stop.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::ShutdownTimeout` if the workers are still
    /// running when `timeout` elapses.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.stats.clone();
        let shutdown = async move {
            let mut panics = Vec::new();
            for (worker_id, joined) in join_all(handles).await.into_iter().enumerate() {
                if let Err(join_error) = joined {
                    error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                    panics.push(ExportError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }

            stats.write().await.active_workers = 0;
            panics
        };

        match tokio::time::timeout(timeout, shutdown).await {
            Ok(panics) => {
                if !panics.is_empty() {
                    warn!(panicked = panics.len(), "some workers panicked before shutdown");
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(ExportError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|handle| !handle.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.has_active_workers() && !self.cancellation_token.is_cancelled() {
            warn!("worker pool dropped without shutdown, cancelling workers");
            self.cancellation_token.cancel();
        }
    }
}
