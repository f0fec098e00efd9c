//! Queue job models and strongly-typed identifiers.
//!
//! Defines the closed set of job kinds the pipeline recognizes, the job
//! lifecycle persisted in the `queue_jobs` table, and the typed payloads each
//! job kind carries.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed queue job identifier.
///
/// # Example
///
/// ```
/// use elasticdash_core::models::JobId;
/// let job_id = JobId::new();
/// println!("Enqueued job: {}", job_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for JobId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for JobId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Closed set of job names the queue accepts.
///
/// A name outside this set is a configuration error: it is rejected at
/// enqueue time and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Periodic cloud usage metering.
    #[serde(rename = "cloud-usage-metering-job")]
    CloudUsageMeteringJob,
    /// Export of a project's events to PostHog.
    #[serde(rename = "posthog-integration-job")]
    PostHogIntegrationJob,
    /// Export of a project's events to Mixpanel.
    #[serde(rename = "mixpanel-integration-job")]
    MixpanelIntegrationJob,
    /// Removal of records that depend on deleted traces.
    #[serde(rename = "trace-delete-job")]
    TraceDeleteJob,
}

impl JobKind {
    /// Every recognized job kind.
    pub const ALL: [Self; 4] = [
        Self::CloudUsageMeteringJob,
        Self::PostHogIntegrationJob,
        Self::MixpanelIntegrationJob,
        Self::TraceDeleteJob,
    ];

    /// Queue name of this job kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CloudUsageMeteringJob => "cloud-usage-metering-job",
            Self::PostHogIntegrationJob => "posthog-integration-job",
            Self::MixpanelIntegrationJob => "mixpanel-integration-job",
            Self::TraceDeleteJob => "trace-delete-job",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput(format!("unrecognized job kind: {s}")))
    }
}

impl sqlx::Type<PgDb> for JobKind {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobKind {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for JobKind {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Job lifecycle status.
///
/// ```text
/// Pending -> Running -> Completed
///    ^          |
///    └──────────┤ (retryable failure, attempts left, or released on shutdown)
///               └-> Failed (non-retryable or retries exhausted)
/// ```
///
/// A `Running` job whose claim lease has expired is claimable again, which
/// recovers jobs held by a worker that crashed or stopped mid-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker, possibly until `next_run_at`.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Handler finished successfully. Terminal.
    Completed,
    /// Permanently failed. Terminal.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for JobStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for JobStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string().as_str(), buf)
    }
}

/// A job persisted in the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueJob {
    /// Unique identifier for this job.
    pub id: JobId,

    /// Recognized job kind.
    pub name: JobKind,

    /// Kind-specific JSON payload.
    pub payload: Value,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Number of failed attempts so far.
    pub attempts: i32,

    /// Earliest time the job may be claimed again.
    pub next_run_at: Option<DateTime<Utc>>,

    /// Error message of the most recent failed attempt.
    pub last_error: Option<String>,

    /// End of the current claim lease while `Running`.
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,

    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

impl QueueJob {
    /// Creates a pending job ready to be claimed immediately.
    pub fn new(name: JobKind, payload: Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            name,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            next_run_at: None,
            last_error: None,
            locked_until: None,
            created_at,
        }
    }

    /// Whether the job is `Running` under a lease that ended at or before
    /// `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.locked_until.is_some_and(|until| until <= now)
    }

    /// Attempt number of the next execution (1-based).
    pub fn next_attempt(&self) -> u32 {
        u32::try_from(self.attempts).unwrap_or(0).saturating_add(1)
    }

    /// Deserializes the payload into the kind-specific type.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the payload does not match.
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload of `CloudUsageMeteringJob`.
///
/// Carries only the job name; the metering consumer derives its window from
/// its own schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringJobPayload {
    /// Always `CloudUsageMeteringJob`.
    pub name: JobKind,
}

impl Default for MeteringJobPayload {
    fn default() -> Self {
        Self { name: JobKind::CloudUsageMeteringJob }
    }
}

/// Payload of the integration export jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJobPayload {
    /// Project whose events are exported.
    pub project_id: String,
    /// Inclusive start of the export window.
    pub from: DateTime<Utc>,
    /// Exclusive end of the export window.
    pub to: DateTime<Utc>,
}

/// Payload of `TraceDeleteJob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDeleteJobPayload {
    /// Project that owned the traces.
    pub project_id: String,
    /// Deleted trace ids.
    pub trace_ids: Vec<String>,
}
