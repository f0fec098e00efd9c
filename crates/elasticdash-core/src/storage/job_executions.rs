//! Repository for dependent job execution records.
//!
//! Execution records reference the trace that triggered them through
//! `job_input_trace_id`. When a trace is deleted from the system of record
//! these rows must go with it.

use std::sync::Arc;

use sqlx::PgPool;

use crate::error::Result;

/// Repository for job execution database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Deletes every execution of `project_id` whose input trace is one of
    /// `trace_ids`, in a single statement.
    ///
    /// Returns the number of deleted rows. Deleting ids that have no rows is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete_by_trace_ids(&self, project_id: &str, trace_ids: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM job_executions
            WHERE project_id = $1
              AND job_input_trace_id = ANY($2)
            ",
        )
        .bind(project_id)
        .bind(trace_ids)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
