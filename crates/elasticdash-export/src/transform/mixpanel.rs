//! Mixpanel payloads.
//!
//! Mixpanel deduplicates on `$insert_id` and expects `time` in epoch
//! milliseconds. There is no person-profile policy: identified events carry
//! `$user_id`, anonymous ones only the deterministic `distinct_id`.

use elasticdash_core::CanonicalEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{merge_remaining, mixpanel_event_name};
use crate::identity::{deterministic_id, resolve_session_id, DistinctId, MIXPANEL_NAMESPACE};

/// One event of a Mixpanel import batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixpanelEvent {
    /// Event name.
    pub event: String,
    /// Structural and canonical properties.
    pub properties: Map<String, Value>,
}

impl MixpanelEvent {
    /// Deduplication key of this event.
    pub fn insert_id(&self) -> Option<&str> {
        self.properties.get("$insert_id").and_then(Value::as_str)
    }

    /// Identity this event is attributed to.
    pub fn distinct_id(&self) -> Option<&str> {
        self.properties.get("distinct_id").and_then(Value::as_str)
    }
}

/// Maps a canonical event of `project_id` to its Mixpanel payload.
pub fn transform<E: CanonicalEvent + ?Sized>(event: &E, project_id: &str) -> MixpanelEvent {
    let insert_id = deterministic_id(&MIXPANEL_NAMESPACE, project_id, event.id());
    let identity = DistinctId::resolve(event.user_id(), insert_id);
    let session_id = resolve_session_id(event.mixpanel_session_id(), event.session_id());

    let mut properties = Map::new();
    properties.insert("time".to_string(), Value::from(event.timestamp().timestamp_millis()));
    if let DistinctId::Identified(user_id) = &identity {
        properties.insert("$user_id".to_string(), Value::from(user_id.as_str()));
    }
    properties.insert("distinct_id".to_string(), Value::from(identity.into_string()));
    properties.insert("$insert_id".to_string(), Value::from(insert_id.to_string()));
    if let Some(session_id) = session_id {
        properties.insert("session_id".to_string(), Value::from(session_id));
    }

    merge_remaining(&mut properties, event.remaining_properties());

    MixpanelEvent { event: mixpanel_event_name(event.kind()).to_string(), properties }
}
