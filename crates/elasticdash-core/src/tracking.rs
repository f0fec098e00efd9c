//! Error-tracking collaborator.
//!
//! Failures that must be visible out of band (reconciliation errors, jobs
//! that exhausted their retries) are handed to an `ErrorTracker` in addition
//! to being logged. Capturing never fails and never blocks the caller.

use std::error::Error;

use tracing::error;

/// Out-of-band error reporting.
///
/// Implementations must swallow their own failures; callers treat capture as
/// fire-and-forget.
pub trait ErrorTracker: Send + Sync + std::fmt::Debug {
    /// Reports an error.
    fn capture(&self, error: &(dyn Error + Send + Sync + 'static));
}

/// Tracker that discards every error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpErrorTracker;

impl NoOpErrorTracker {
    /// Creates a new no-op tracker.
    pub fn new() -> Self {
        Self
    }
}

impl ErrorTracker for NoOpErrorTracker {
    fn capture(&self, _error: &(dyn Error + Send + Sync + 'static)) {}
}

/// Tracker that emits captured errors as `tracing` events.
///
/// Events use the `error_tracking` target so a subscriber layer can forward
/// them to an external service.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorTracker;

impl TracingErrorTracker {
    /// Creates a new tracing-backed tracker.
    pub fn new() -> Self {
        Self
    }
}

impl ErrorTracker for TracingErrorTracker {
    fn capture(&self, error: &(dyn Error + Send + Sync + 'static)) {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        error!(
            target: "error_tracking",
            error = %error,
            causes = ?chain,
            "exception captured"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;

    #[test]
    fn trackers_accept_any_error() {
        let error = CoreError::Database("connection reset".to_string());

        NoOpErrorTracker::new().capture(&error);
        TracingErrorTracker::new().capture(&error);
    }
}
