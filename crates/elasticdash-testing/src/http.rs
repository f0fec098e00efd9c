//! Wiremock-backed stand-ins for the analytics destinations.

use std::time::Duration;

use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

/// PostHog batch capture path.
pub const POSTHOG_BATCH_PATH: &str = "/batch/";

/// Mixpanel import path.
pub const MIXPANEL_IMPORT_PATH: &str = "/import";

/// HTTP server answering like a PostHog or Mixpanel ingestion host.
pub struct DestinationServer {
    server: MockServer,
}

impl DestinationServer {
    /// Starts a server on a random port with no routes mounted.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL to configure as the destination host.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Answers every POST to `route` with `status`.
    pub async fn respond(&self, route: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answers the next `times` POSTs to `route` with `status`, then falls
    /// through to later mounts.
    pub async fn respond_times(&self, route: &str, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answers POSTs to `route` with 429 and a `Retry-After` header.
    pub async fn rate_limit(&self, route: &str, retry_after: Duration) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", retry_after.as_secs().to_string()),
            )
            .mount(&self.server)
            .await;
    }

    /// Accepts PostHog batches and Mixpanel imports with 200.
    pub async fn accept_all(&self) {
        self.respond(POSTHOG_BATCH_PATH, 200).await;
        self.respond(MIXPANEL_IMPORT_PATH, 200).await;
    }

    /// Requests received on `route`, oldest first.
    pub async fn requests_to(&self, route: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == route)
            .collect()
    }

    /// JSON bodies received on `route`, oldest first.
    pub async fn bodies(&self, route: &str) -> Vec<Value> {
        self.requests_to(route)
            .await
            .iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }
}
