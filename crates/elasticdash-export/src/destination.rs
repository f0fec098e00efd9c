//! Destination sinks.
//!
//! A sink transforms canonical events for its destination and posts them in
//! one request. Credentials are process-level configuration; a sink without
//! credentials refuses to send.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use elasticdash_core::{AnalyticsEvent, JobKind};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    client::{DestinationClient, DestinationRequest},
    error::{ExportError, Result},
    transform::{mixpanel, posthog, PostHogEvent},
};

/// An analytics destination events can be exported to.
#[async_trait]
pub trait Destination: Send + Sync + fmt::Debug {
    /// Destination name, for logs.
    fn name(&self) -> &'static str;

    /// Job kind that exports to this destination.
    fn job_kind(&self) -> JobKind;

    /// Transforms and sends one batch of events of `project_id`.
    ///
    /// Returns the number of events accepted by the destination.
    async fn send_batch(&self, project_id: &str, events: &[AnalyticsEvent]) -> Result<usize>;
}

/// PostHog `/batch/` sink.
#[derive(Clone)]
pub struct PostHogDestination {
    client: DestinationClient,
    host: String,
    api_key: Option<String>,
}

impl PostHogDestination {
    /// Creates a PostHog sink posting to `host`.
    pub fn new(
        client: DestinationClient,
        host: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self { client, host: host.into(), api_key }
    }
}

impl fmt::Debug for PostHogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogDestination")
            .field("host", &self.host)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
struct PostHogBatch<'a> {
    api_key: &'a str,
    batch: Vec<PostHogCapture<'a>>,
}

/// Capture as the batch endpoint expects it (`distinct_id` in snake case).
#[derive(Serialize)]
struct PostHogCapture<'a> {
    event: &'a str,
    distinct_id: &'a str,
    properties: &'a Map<String, Value>,
    timestamp: DateTime<Utc>,
    uuid: Uuid,
}

impl<'a> From<&'a PostHogEvent> for PostHogCapture<'a> {
    fn from(event: &'a PostHogEvent) -> Self {
        Self {
            event: &event.event,
            distinct_id: &event.distinct_id,
            properties: &event.properties,
            timestamp: event.timestamp,
            uuid: event.uuid,
        }
    }
}

#[async_trait]
impl Destination for PostHogDestination {
    fn name(&self) -> &'static str {
        "posthog"
    }

    fn job_kind(&self) -> JobKind {
        JobKind::PostHogIntegrationJob
    }

    async fn send_batch(&self, project_id: &str, events: &[AnalyticsEvent]) -> Result<usize> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExportError::configuration("POSTHOG_API_KEY is not configured"))?;
        if events.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<PostHogEvent> =
            events.iter().map(|event| posthog::transform(event, project_id)).collect();
        let body = serde_json::to_vec(&PostHogBatch {
            api_key,
            batch: payloads.iter().map(PostHogCapture::from).collect(),
        })?;

        self.client
            .send(DestinationRequest {
                destination: self.name(),
                url: format!("{}/batch/", self.host.trim_end_matches('/')),
                body: Bytes::from(body),
                basic_auth_user: None,
                event_count: payloads.len(),
            })
            .await?;

        Ok(payloads.len())
    }
}

/// Mixpanel `/import` sink.
#[derive(Clone)]
pub struct MixpanelDestination {
    client: DestinationClient,
    host: String,
    token: Option<String>,
}

impl MixpanelDestination {
    /// Creates a Mixpanel sink posting to `host`.
    pub fn new(client: DestinationClient, host: impl Into<String>, token: Option<String>) -> Self {
        Self { client, host: host.into(), token }
    }
}

impl fmt::Debug for MixpanelDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixpanelDestination")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl Destination for MixpanelDestination {
    fn name(&self) -> &'static str {
        "mixpanel"
    }

    fn job_kind(&self) -> JobKind {
        JobKind::MixpanelIntegrationJob
    }

    async fn send_batch(&self, project_id: &str, events: &[AnalyticsEvent]) -> Result<usize> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ExportError::configuration("MIXPANEL_TOKEN is not configured"))?;
        if events.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<_> =
            events.iter().map(|event| mixpanel::transform(event, project_id)).collect();
        let body = serde_json::to_vec(&payloads)?;

        self.client
            .send(DestinationRequest {
                destination: self.name(),
                url: format!("{}/import?strict=1", self.host.trim_end_matches('/')),
                body: Bytes::from(body),
                basic_auth_user: Some(token.to_string()),
                event_count: payloads.len(),
            })
            .await?;

        Ok(payloads.len())
    }
}
