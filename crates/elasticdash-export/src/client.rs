//! HTTP client shared by the destination sinks.
//!
//! Sends one JSON batch per request and turns the response status into an
//! `ExportError` the retry policy understands.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{ExportError, Result};

/// Maximum number of response body bytes kept for error messages.
const MAX_ERROR_BODY: usize = 1024;

/// Configuration of the destination HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout of a single request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("elasticdash-export/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A serialized batch bound for one destination.
#[derive(Debug, Clone)]
pub struct DestinationRequest {
    /// Destination name, for logs.
    pub destination: &'static str,
    /// Full endpoint URL.
    pub url: String,
    /// JSON body.
    pub body: Bytes,
    /// Basic-auth user, if the destination authenticates that way.
    pub basic_auth_user: Option<String>,
    /// Number of events in the body.
    pub event_count: usize,
}

/// Successful destination response.
#[derive(Debug, Clone)]
pub struct DestinationResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

/// Pooled HTTP client used by every destination sink.
#[derive(Debug, Clone)]
pub struct DestinationClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DestinationClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ExportError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Posts a batch and classifies the outcome.
    ///
    /// # Errors
    ///
    /// - `Network` / `Timeout` when no response arrived
    /// - `RateLimited` for 429, honoring `Retry-After`
    /// - `ClientError` for other 4xx
    /// - `ServerError` for 5xx and unexpected statuses
    pub async fn send(&self, request: DestinationRequest) -> Result<DestinationResponse> {
        let span = info_span!(
            "destination_request",
            destination = request.destination,
            url = %request.url,
            events = request.event_count
        );

        async move {
            let start = std::time::Instant::now();

            let mut http_request = self
                .client
                .post(&request.url)
                .header("content-type", "application/json")
                .body(request.body);
            if let Some(user) = &request.basic_auth_user {
                http_request = http_request.basic_auth(user, Some(""));
            }

            let response = http_request.send().await.map_err(|e| {
                tracing::warn!(
                    duration_ms = start.elapsed().as_millis(),
                    error = %e,
                    "request failed"
                );
                if e.is_timeout() {
                    ExportError::timeout(self.config.timeout.as_secs())
                } else {
                    ExportError::network(e.to_string())
                }
            })?;

            let status_code = response.status().as_u16();
            let headers = extract_headers(response.headers());
            let body = match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes),
                Err(e) => format!("[failed to read response body: {e}]"),
            };
            let duration = start.elapsed();

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            match status_code {
                200..=299 => Ok(DestinationResponse { status_code, body, duration }),
                429 => {
                    let retry_after = extract_retry_after_seconds(&headers).unwrap_or(60);
                    Err(ExportError::rate_limited(retry_after))
                },
                400..=499 => Err(ExportError::client_error(status_code, body)),
                _ => Err(ExportError::server_error(status_code, body)),
            }
        }
        .instrument(span)
        .await
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_ERROR_BODY {
        let truncated = String::from_utf8_lossy(&bytes[..MAX_ERROR_BODY]);
        format!("{truncated}... (truncated)")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            Some((key.as_str().to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

/// Extracts the retry delay from a `Retry-After` header.
///
/// Accepts delta-seconds and HTTP dates. An unparseable value falls back to
/// 60 seconds; a missing header yields `None`.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Option<u64> {
    const DEFAULT_RETRY_AFTER: u64 = 60;

    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;

    if let Ok(seconds) = retry_after.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let wait = date_time.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return Some(wait.to_std().map_or(0, |wait| wait.as_secs()));
    }

    Some(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(url: String) -> DestinationRequest {
        DestinationRequest {
            destination: "test",
            url,
            body: Bytes::from_static(b"[]"),
            basic_auth_user: None,
            event_count: 0,
        }
    }

    #[tokio::test]
    async fn success_returns_response() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1"))
            .mount(&server)
            .await;

        let client = DestinationClient::with_defaults().unwrap();
        let response = client.send(request(format!("{}/import", server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "1");
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_after() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let client = DestinationClient::with_defaults().unwrap();
        let error = client.send(request(server.uri())).await.unwrap_err();

        assert_eq!(error.retry_after_seconds(), Some(30));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let client = DestinationClient::with_defaults().unwrap();
        let error = client.send(request(server.uri())).await.unwrap_err();

        assert!(matches!(error, ExportError::ClientError { status_code: 401, .. }));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = DestinationClient::with_defaults().unwrap();
        let error = client.send(request(server.uri())).await.unwrap_err();

        assert!(matches!(error, ExportError::ServerError { status_code: 502, .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HashMap::new();
        assert_eq!(extract_retry_after_seconds(&headers), None);

        headers.insert("retry-after".to_string(), "15".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), Some(15));

        headers.insert("retry-after".to_string(), "soon".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), Some(60));
    }
}
