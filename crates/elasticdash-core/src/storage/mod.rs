//! Postgres repositories for the export pipeline.
//!
//! Every query the pipeline issues lives in one of these repositories:
//!
//! - `queue_jobs`: the durable job queue
//! - `job_executions`: dependent execution records keyed by trace
//! - `analytics_events`: read-only canonical event views
//!
//! The analytics views are owned by the system of record and are never
//! created here. [`Storage::ensure_schema`] only bootstraps the tables the
//! pipeline itself writes.

use std::sync::Arc;

use sqlx::PgPool;

pub mod analytics_events;
pub mod job_executions;
pub mod queue_jobs;

use crate::error::Result;

/// Container for all repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    pool: Arc<PgPool>,

    /// Durable job queue.
    pub queue_jobs: Arc<queue_jobs::Repository>,

    /// Dependent execution records.
    pub job_executions: Arc<job_executions::Repository>,

    /// Canonical event views.
    pub analytics_events: Arc<analytics_events::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            queue_jobs: Arc::new(queue_jobs::Repository::new(pool.clone())),
            job_executions: Arc::new(job_executions::Repository::new(pool.clone())),
            analytics_events: Arc::new(analytics_events::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Creates the queue and execution tables if they do not exist yet.
    ///
    /// Safe to run on every worker start.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }

        Ok(())
    }
}

const SCHEMA: [&str; 6] = [
    r"
    CREATE TABLE IF NOT EXISTS queue_jobs (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        next_run_at TIMESTAMPTZ,
        last_error TEXT,
        locked_until TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    // Queues created before claim leases existed.
    r"
    ALTER TABLE queue_jobs ADD COLUMN IF NOT EXISTS locked_until TIMESTAMPTZ
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_queue_jobs_pending
    ON queue_jobs(name, next_run_at, created_at)
    WHERE status = 'pending'
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_queue_jobs_running_lease
    ON queue_jobs(name, locked_until)
    WHERE status = 'running'
    ",
    r"
    CREATE TABLE IF NOT EXISTS job_executions (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        project_id TEXT NOT NULL,
        job_input_trace_id TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_job_executions_trace
    ON job_executions(project_id, job_input_trace_id)
    ",
];
