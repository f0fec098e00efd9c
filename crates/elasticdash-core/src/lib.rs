//! Core domain models for the analytics export pipeline.
//!
//! Provides the canonical trace, generation and score events read from the
//! analytical store, the queue job model, error handling, the clock and
//! error-tracking abstractions, and the PostgreSQL repositories shared by the
//! worker and the operator tooling.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;
pub mod tracking;

pub use error::{CoreError, Result};
pub use events::{
    AnalyticsEvent, CanonicalEvent, EventCursor, EventKind, GenerationEvent, ScoreEvent, TraceEvent,
};
pub use models::{
    ExportJobPayload, JobId, JobKind, JobStatus, MeteringJobPayload, QueueJob,
    TraceDeleteJobPayload,
};
pub use time::{Clock, RealClock, TestClock};
pub use tracking::{ErrorTracker, NoOpErrorTracker, TracingErrorTracker};
