//! Error tracker that remembers what it captured.

use std::{
    error::Error,
    sync::{Arc, Mutex},
};

use elasticdash_core::ErrorTracker;

/// Records the message of every captured error.
///
/// Clones share the same record, so a test can keep one handle and inject
/// the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingErrorTracker {
    captured: Arc<Mutex<Vec<String>>>,
}

impl RecordingErrorTracker {
    /// Creates a tracker with nothing captured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of the captured errors, oldest first.
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Number of captured errors.
    pub fn count(&self) -> usize {
        self.captured().len()
    }
}

impl ErrorTracker for RecordingErrorTracker {
    fn capture(&self, error: &(dyn Error + Send + Sync + 'static)) {
        self.captured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(error.to_string());
    }
}
