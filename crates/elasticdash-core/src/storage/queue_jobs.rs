//! Repository for the durable job queue.
//!
//! Jobs move `pending -> running -> completed | failed`. A retryable failure
//! puts the job back to `pending` with a `next_run_at` in the future; claims
//! skip jobs whose `next_run_at` has not been reached yet.
//!
//! Every claim carries a lease in `locked_until`. A job left `running` after
//! its lease ended (worker crash, shutdown timeout, lost outcome write) is
//! claimed again, and the expired claim counts as a failed attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{JobId, JobKind, JobStatus, QueueJob},
};

/// Recorded as `last_error` when a job is reclaimed after its lease ended.
pub const LEASE_EXPIRED_ERROR: &str = "claim lease expired";

/// Repository for queue job database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Persists a new job.
    ///
    /// The returned id is the queue's acknowledgment: once this resolves the
    /// job is durable.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn enqueue(&self, job: &QueueJob) -> Result<JobId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO queue_jobs (
                id, name, payload, status, attempts, next_run_at, last_error,
                locked_until, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            ",
        )
        .bind(job.id)
        .bind(job.name)
        .bind(&job.payload)
        .bind(job.status)
        .bind(job.attempts)
        .bind(job.next_run_at)
        .bind(&job.last_error)
        .bind(job.locked_until)
        .bind(job.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Claims due jobs of the given kinds until `locked_until`.
    ///
    /// Due means `pending` with `next_run_at` reached, or `running` with a
    /// lease that ended at or before `now`. Uses `FOR UPDATE SKIP LOCKED` so
    /// concurrent workers never claim the same job. Jobs are claimed oldest
    /// first and flipped to `running` in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_due(
        &self,
        kinds: &[JobKind],
        batch_size: usize,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<Vec<QueueJob>> {
        if kinds.is_empty() || batch_size == 0 {
            return Ok(Vec::new());
        }

        let names: Vec<&str> = kinds.iter().map(JobKind::as_str).collect();
        let mut tx = self.pool.begin().await?;

        let ids: Vec<JobId> = sqlx::query_scalar(
            r"
            SELECT id FROM queue_jobs
            WHERE name = ANY($1)
              AND (
                (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= $2))
                OR (status = 'running' AND locked_until <= $2)
              )
            ORDER BY created_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(&names)
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let raw_ids: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();
        let mut jobs = sqlx::query_as::<_, QueueJob>(
            r"
            UPDATE queue_jobs
            SET attempts = CASE WHEN status = 'running' THEN attempts + 1 ELSE attempts END,
                last_error = CASE WHEN status = 'running' THEN $3 ELSE last_error END,
                status = 'running',
                locked_until = $2
            WHERE id = ANY($1)
            RETURNING id, name, payload, status, attempts, next_run_at, last_error,
                      locked_until, created_at
            ",
        )
        .bind(&raw_ids)
        .bind(locked_until)
        .bind(LEASE_EXPIRED_ERROR)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Hands claimed jobs that were never started back to `pending`.
    ///
    /// Jobs no longer `running` are left alone. Returns how many jobs were
    /// released.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn release(&self, ids: &[JobId]) -> Result<u64> {
        let raw_ids: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            r"
            UPDATE queue_jobs
            SET status = 'pending', locked_until = NULL
            WHERE id = ANY($1) AND status = 'running'
            ",
        )
        .bind(&raw_ids)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Marks a job as completed.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_completed(&self, id: JobId) -> Result<()> {
        self.set_outcome(id, JobStatus::Completed, None, None, None).await
    }

    /// Returns a job to `pending`, due again at `next_run_at`.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn schedule_retry(
        &self,
        id: JobId,
        attempts: i32,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        self.set_outcome(id, JobStatus::Pending, Some(attempts), Some(next_run_at), Some(error))
            .await
    }

    /// Marks a job as permanently failed.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_failed(&self, id: JobId, attempts: i32, error: &str) -> Result<()> {
        self.set_outcome(id, JobStatus::Failed, Some(attempts), None, Some(error)).await
    }

    async fn set_outcome(
        &self,
        id: JobId,
        status: JobStatus,
        attempts: Option<i32>,
        next_run_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE queue_jobs
            SET status = $2,
                attempts = COALESCE($3, attempts),
                next_run_at = $4,
                last_error = COALESCE($5, last_error),
                locked_until = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(attempts)
        .bind(next_run_at)
        .bind(error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
