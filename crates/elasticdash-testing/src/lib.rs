//! Test infrastructure for the ElasticDash export pipeline.
//!
//! Provides canonical event builders, an error tracker that records what it
//! captures, a log capture and wiremock-backed destination servers.

pub mod fixtures;
pub mod http;
pub mod logs;
pub mod tracking;

pub use fixtures::{fixed_time, EventBuilder};
pub use http::DestinationServer;
pub use logs::LogCapture;
pub use tracking::RecordingErrorTracker;
