//! PostHog payloads.
//!
//! PostHog deduplicates on `uuid`. Events without a known user are captured
//! with `$process_person_profile: false` so they do not create person
//! profiles. Identified events with a user URL set it on the person.

use chrono::{DateTime, Utc};
use elasticdash_core::{events::USER_URL_KEY, CanonicalEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{merge_remaining, posthog_event_name};
use crate::identity::{deterministic_id, resolve_session_id, DistinctId, POSTHOG_NAMESPACE};

/// One PostHog capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostHogEvent {
    /// Identity the event is attributed to.
    pub distinct_id: String,
    /// Event name.
    pub event: String,
    /// Structural and canonical properties.
    pub properties: Map<String, Value>,
    /// Instant the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Deduplication key.
    pub uuid: Uuid,
}

impl PostHogEvent {
    /// Whether PostHog should skip person processing for this event.
    pub fn is_anonymous(&self) -> bool {
        self.properties.get("$process_person_profile") == Some(&Value::Bool(false))
    }
}

/// Maps a canonical event of `project_id` to its PostHog payload.
pub fn transform<E: CanonicalEvent + ?Sized>(event: &E, project_id: &str) -> PostHogEvent {
    let uuid = deterministic_id(&POSTHOG_NAMESPACE, project_id, event.id());
    let identity = DistinctId::resolve(event.user_id(), uuid);
    let session_id = resolve_session_id(event.posthog_session_id(), event.session_id());
    let user_url = event.user_url().filter(|url| !url.is_empty());

    let mut properties = Map::new();
    properties.insert("$session_id".to_string(), session_id.map_or(Value::Null, Value::from));
    match user_url {
        Some(user_url) if identity.is_identified() => {
            let mut set = Map::new();
            set.insert(USER_URL_KEY.to_string(), Value::from(user_url));
            properties.insert("$set".to_string(), Value::Object(set));
        },
        _ => {
            properties.insert("$process_person_profile".to_string(), Value::Bool(false));
        },
    }

    merge_remaining(&mut properties, event.remaining_properties());

    PostHogEvent {
        distinct_id: identity.into_string(),
        event: posthog_event_name(event.kind()).to_string(),
        properties,
        timestamp: event.timestamp(),
        uuid,
    }
}
