//! Read-only access to canonical events.
//!
//! The system of record exposes one view per telemetry kind
//! (`analytics_traces`, `analytics_generations`, `analytics_scores`). Each
//! query selects an explicit column list, so columns added to a view later
//! are ignored. Rows are decoded into typed fields; a row whose `timestamp`
//! is missing or not a timestamp fails to decode and the whole read fails.
//!
//! Windows are read in pages with keyset pagination on `(timestamp, id)`, so
//! memory stays bounded by the page size whatever the window holds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, PgPool};

use crate::{
    error::Result,
    events::{AnalyticsEvent, EventCursor, EventKind, GenerationEvent, ScoreEvent, TraceEvent},
};

const TRACES_PAGE: &str = r"
    SELECT id, timestamp, trace_name, url, user_url, cost_usd,
           count_observations, session_id, project_id, user_id,
           latency, release, version, tags, environment, event_version,
           posthog_session_id, mixpanel_session_id
    FROM analytics_traces
    WHERE project_id = $1
      AND timestamp >= $2
      AND timestamp < $3
      AND ($4::timestamptz IS NULL OR (timestamp, id) > ($4, $5::text))
    ORDER BY timestamp ASC, id ASC
    LIMIT $6
";

const GENERATIONS_PAGE: &str = r"
    SELECT id, timestamp, generation_name, trace_name, trace_id, url,
           user_url, cost_usd, input_units, output_units, total_units,
           session_id, project_id, user_id, latency, time_to_first_token,
           release, version, model, level, tags, environment, event_version,
           posthog_session_id, mixpanel_session_id
    FROM analytics_generations
    WHERE project_id = $1
      AND timestamp >= $2
      AND timestamp < $3
      AND ($4::timestamptz IS NULL OR (timestamp, id) > ($4, $5::text))
    ORDER BY timestamp ASC, id ASC
    LIMIT $6
";

const SCORES_PAGE: &str = r"
    SELECT id, timestamp, name, value, comment, metadata, string_value,
           data_type, trace_name, trace_id, user_url, session_id,
           project_id, user_id, release, tags, environment, event_version,
           entity_type, dataset_run_id,
           posthog_session_id, mixpanel_session_id
    FROM analytics_scores
    WHERE project_id = $1
      AND timestamp >= $2
      AND timestamp < $3
      AND ($4::timestamptz IS NULL OR (timestamp, id) > ($4, $5::text))
    ORDER BY timestamp ASC, id ASC
    LIMIT $6
";

/// Repository for canonical event reads.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Up to `limit` events of `kind` for `project_id` with
    /// `from <= timestamp < to`, strictly after `after`, ordered by
    /// `(timestamp, id)`.
    ///
    /// A page shorter than `limit` is the last one.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a row cannot be decoded.
    pub async fn find_page(
        &self,
        project_id: &str,
        kind: EventKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<AnalyticsEvent>> {
        let page = PageQuery { project_id, from, to, after, limit };

        match kind {
            EventKind::Trace => self.fetch::<TraceEvent>(TRACES_PAGE, page).await,
            EventKind::Generation => self.fetch::<GenerationEvent>(GENERATIONS_PAGE, page).await,
            EventKind::Score => self.fetch::<ScoreEvent>(SCORES_PAGE, page).await,
        }
    }

    async fn fetch<T>(&self, sql: &'static str, page: PageQuery<'_>) -> Result<Vec<AnalyticsEvent>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin + Into<AnalyticsEvent>,
    {
        let (after_timestamp, after_id) =
            page.after.map(|cursor| (cursor.timestamp, cursor.id.as_str())).unzip();

        let rows = sqlx::query_as::<_, T>(sql)
            .bind(page.project_id)
            .bind(page.from)
            .bind(page.to)
            .bind(after_timestamp)
            .bind(after_id)
            .bind(i64::try_from(page.limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

struct PageQuery<'a> {
    project_id: &'a str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    after: Option<&'a EventCursor>,
    limit: usize,
}
