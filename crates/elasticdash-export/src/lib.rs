//! Analytics export pipeline for ElasticDash.
//!
//! Canonical trace, generation and score events are transformed into the
//! payload shapes of two analytics destinations, Mixpanel and PostHog, and
//! delivered by queue workers. Every destination event carries a
//! deterministic UUIDv5 derived from the project and event id, so re-exports
//! deduplicate downstream.
//!
//! # Architecture
//!
//! Jobs live in a durable Postgres queue. Workers claim due jobs with
//! `FOR UPDATE SKIP LOCKED` and hand each to the handler registered for its
//! kind:
//!
//! 1. **Integration export** - reads a project's events for a time window,
//!    transforms them and posts them to the destination in batches
//! 2. **Trace deletion** - removes execution records tied to deleted traces
//!
//! Failed jobs are rescheduled with exponential backoff while the failure is
//! transient. Usage metering jobs are only dispatched from here; a separate
//! service consumes them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use elasticdash_core::{RealClock, TracingErrorTracker};
//! use elasticdash_export::{EngineConfig, ExportEngine, ExportError, HandlerRegistry};
//! use elasticdash_export::storage::JobStore;
//!
//! # async fn example(
//! #     store: Arc<dyn JobStore>,
//! #     handlers: HandlerRegistry,
//! # ) -> Result<(), ExportError> {
//! let mut engine = ExportEngine::new(
//!     store,
//!     handlers,
//!     EngineConfig::default(),
//!     Arc::new(RealClock::new()),
//!     Arc::new(TracingErrorTracker),
//! );
//!
//! engine.start().await?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod destination;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod reconcile;
pub mod retry;
pub mod storage;
pub mod transform;
pub mod worker;
mod worker_pool;

pub use config::Config;
pub use destination::{Destination, MixpanelDestination, PostHogDestination};
pub use dispatch::{retrigger_metering, with_queue, JobDispatcher};
pub use error::{ExportError, Result};
pub use handlers::{ExportJobHandler, HandlerRegistry, JobHandler, TraceDeleteHandler};
pub use reconcile::DeletionReconciler;
pub use worker::{EngineConfig, EngineStats, ExportEngine};

/// Default number of concurrent queue workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default number of jobs claimed per poll.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default destination request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default maximum attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default seconds a claimed job stays reserved for its worker.
pub const DEFAULT_CLAIM_LEASE_SECONDS: u64 = 600;

/// Default maximum events per destination request.
pub const DEFAULT_EXPORT_BATCH_SIZE: usize = 500;
