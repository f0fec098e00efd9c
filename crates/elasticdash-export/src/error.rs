//! Error types for export, reconciliation and dispatch operations.
//!
//! Every failure is classified as retryable or not. The worker only
//! reschedules retryable failures; everything else fails the job on the spot.

use std::fmt;

use elasticdash_core::CoreError;
use thiserror::Error;

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Error conditions of the export pipeline.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Destination request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Destination rejected the request (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Destination failed to process the request (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Destination asked us to slow down.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after_seconds: u64,
    },

    /// Database or queue operation failed.
    #[error("database error: {message}")]
    Database {
        /// Database error message
        message: String,
    },

    /// Unknown job name, missing handler or missing credentials.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Job payload or event row could not be decoded.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Decoding error message
        message: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: std::time::Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Worker identifier
        worker_id: usize,
        /// Panic message
        error: String,
    },

    /// Every attempt of a job ended with its claim lease expiring.
    #[error("claim lease expired on all {attempts} attempts")]
    LeaseExpired {
        /// Attempts consumed by expired claims
        attempts: u32,
    },

    /// Unexpected internal error.
    #[error("internal export error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl ExportError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the failure is transient and the job should be retried.
    ///
    /// Network errors, timeouts, 5xx responses, rate limits and database
    /// failures are retryable. Client errors, configuration problems and
    /// undecodable payloads are not: retrying cannot fix them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::Database { .. } => true,

            Self::ClientError { .. }
            | Self::Configuration { .. }
            | Self::InvalidPayload { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. }
            | Self::LeaseExpired { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Destination-provided retry delay, if any.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<CoreError> for ExportError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::InvalidInput(message) => Self::invalid_payload(message),
            other => Self::database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(error: serde_json::Error) -> Self {
        Self::invalid_payload(error.to_string())
    }
}

/// Category of export error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// Destination rejected the request.
    Client,
    /// Destination failed.
    Server,
    /// Rate limiting.
    RateLimit,
    /// Database and queue operations.
    Database,
    /// Configuration and payload problems.
    Configuration,
    /// Internal system errors.
    Internal,
}

impl From<&ExportError> for ErrorCategory {
    fn from(error: &ExportError) -> Self {
        match error {
            ExportError::Network { .. } | ExportError::Timeout { .. } => Self::Network,
            ExportError::ClientError { .. } => Self::Client,
            ExportError::ServerError { .. } => Self::Server,
            ExportError::RateLimited { .. } => Self::RateLimit,
            ExportError::Database { .. } => Self::Database,
            ExportError::Configuration { .. } | ExportError::InvalidPayload { .. } => {
                Self::Configuration
            },
            ExportError::ShutdownTimeout { .. }
            | ExportError::WorkerPanic { .. }
            | ExportError::LeaseExpired { .. }
            | ExportError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Database => write!(f, "database"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(ExportError::network("connection refused").is_retryable());
        assert!(ExportError::timeout(30).is_retryable());
        assert!(ExportError::server_error(503, "unavailable").is_retryable());
        assert!(ExportError::rate_limited(60).is_retryable());
        assert!(ExportError::database("connection lost").is_retryable());
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(!ExportError::client_error(401, "bad token").is_retryable());
        assert!(!ExportError::configuration("unrecognized job kind").is_retryable());
        assert!(!ExportError::invalid_payload("missing project_id").is_retryable());
        assert!(!ExportError::WorkerPanic { worker_id: 0, error: "boom".into() }.is_retryable());
        assert!(!ExportError::LeaseExpired { attempts: 5 }.is_retryable());
    }

    #[test]
    fn core_errors_keep_their_retry_class() {
        let decode = ExportError::from(CoreError::InvalidInput("bad row".to_string()));
        assert!(!decode.is_retryable());

        let database = ExportError::from(CoreError::Database("pool timed out".to_string()));
        assert!(database.is_retryable());
    }

    #[test]
    fn rate_limit_exposes_retry_after() {
        assert_eq!(ExportError::rate_limited(120).retry_after_seconds(), Some(120));
        assert_eq!(ExportError::timeout(30).retry_after_seconds(), None);
    }

    #[test]
    fn categories_group_related_failures() {
        assert_eq!(ErrorCategory::from(&ExportError::timeout(5)), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&ExportError::invalid_payload("x")),
            ErrorCategory::Configuration
        );
        assert_eq!(ErrorCategory::from(&ExportError::rate_limited(1)).to_string(), "rate_limit");
    }
}
