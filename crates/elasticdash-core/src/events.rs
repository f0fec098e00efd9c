//! Canonical analytics events read from the analytical store.
//!
//! One closed record type per telemetry kind. Only `id` and `timestamp` are
//! required; every other field is optional and an absent field is omitted
//! from exported payloads rather than replaced by a placeholder.
//!
//! Serialized field names are the property keys of the analytical store
//! (`elasticdash_*`). Deserialization ignores unknown keys, and rows decoded
//! through `sqlx::FromRow` only see the columns the repository selects.
//!
//! Each event carries two kinds of session identifier:
//!
//! - `session_id`: the generic ElasticDash session tracker
//! - `posthog_session_id` / `mixpanel_session_id`: client-side session ids
//!   captured by the matching destination SDK
//!
//! The destination-native fields never appear in the property bag returned by
//! [`CanonicalEvent::remaining_properties`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property key of the PostHog client-side session id.
pub const POSTHOG_SESSION_ID_KEY: &str = "posthog_session_id";

/// Property key of the Mixpanel client-side session id.
pub const MIXPANEL_SESSION_ID_KEY: &str = "mixpanel_session_id";

/// Property key of the user-facing profile URL.
pub const USER_URL_KEY: &str = "elasticdash_user_url";

/// Telemetry kind of a canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A trace: the root of one LLM application request.
    Trace,
    /// A generation: one model call inside a trace.
    Generation,
    /// A score attached to a trace, observation, session or dataset run.
    Score,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Generation => write!(f, "generation"),
            Self::Score => write!(f, "score"),
        }
    }
}

impl EventKind {
    /// Every kind, in export order.
    pub const ALL: [Self; 3] = [Self::Trace, Self::Generation, Self::Score];
}

/// Keyset position inside one kind's event stream, ordered by
/// `(timestamp, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    /// Timestamp of the last event already read.
    pub timestamp: DateTime<Utc>,
    /// Id of the last event already read.
    pub id: String,
}

impl EventCursor {
    /// Cursor positioned right after `event`.
    pub fn after(event: &impl CanonicalEvent) -> Self {
        Self { timestamp: event.timestamp(), id: event.id().to_string() }
    }
}

/// Read-only view shared by every canonical event kind.
///
/// Transformers only depend on this trait, so they stay independent of the
/// kind-specific fields.
pub trait CanonicalEvent {
    /// Telemetry kind of this event.
    fn kind(&self) -> EventKind;

    /// Opaque event id, unique per event and kind.
    fn id(&self) -> &str;

    /// Instant the event occurred.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Identified user, if any.
    fn user_id(&self) -> Option<&str>;

    /// User-facing profile URL, if any.
    fn user_url(&self) -> Option<&str>;

    /// Generic ElasticDash session id.
    fn session_id(&self) -> Option<&str>;

    /// PostHog client-side session id.
    fn posthog_session_id(&self) -> Option<&str>;

    /// Mixpanel client-side session id.
    fn mixpanel_session_id(&self) -> Option<&str>;

    /// All present canonical fields keyed by property name, with both
    /// destination-native session ids removed.
    fn remaining_properties(&self) -> Map<String, Value>;
}

/// Canonical trace event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TraceEvent {
    /// Trace id.
    #[serde(rename = "elasticdash_id")]
    pub id: String,
    /// Trace timestamp.
    pub timestamp: DateTime<Utc>,
    /// Trace name.
    #[serde(rename = "elasticdash_trace_name", skip_serializing_if = "Option::is_none")]
    pub trace_name: Option<String>,
    /// Dashboard URL of the trace.
    #[serde(rename = "elasticdash_url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Dashboard URL of the user.
    #[serde(rename = "elasticdash_user_url", skip_serializing_if = "Option::is_none")]
    pub user_url: Option<String>,
    /// Total cost in USD.
    #[serde(rename = "elasticdash_cost_usd", skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Number of observations in the trace.
    #[serde(rename = "elasticdash_count_observations", skip_serializing_if = "Option::is_none")]
    pub count_observations: Option<i64>,
    /// Generic session id.
    #[serde(rename = "elasticdash_session_id", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning project.
    #[serde(rename = "elasticdash_project_id", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Identified user.
    #[serde(rename = "elasticdash_user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Latency in seconds.
    #[serde(rename = "elasticdash_latency", skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    /// Application release.
    #[serde(rename = "elasticdash_release", skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Application version.
    #[serde(rename = "elasticdash_version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form tags.
    #[serde(rename = "elasticdash_tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Deployment environment.
    #[serde(rename = "elasticdash_environment", skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Schema version of the exported event.
    #[serde(rename = "elasticdash_event_version", skip_serializing_if = "Option::is_none")]
    pub event_version: Option<String>,
    /// PostHog client-side session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posthog_session_id: Option<String>,
    /// Mixpanel client-side session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixpanel_session_id: Option<String>,
}

/// Canonical generation event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GenerationEvent {
    /// Observation id of the generation.
    #[serde(rename = "elasticdash_id")]
    pub id: String,
    /// Generation start time.
    pub timestamp: DateTime<Utc>,
    /// Generation name.
    #[serde(rename = "elasticdash_generation_name", skip_serializing_if = "Option::is_none")]
    pub generation_name: Option<String>,
    /// Name of the parent trace.
    #[serde(rename = "elasticdash_trace_name", skip_serializing_if = "Option::is_none")]
    pub trace_name: Option<String>,
    /// Id of the parent trace.
    #[serde(rename = "elasticdash_trace_id", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Dashboard URL of the generation.
    #[serde(rename = "elasticdash_url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Dashboard URL of the user.
    #[serde(rename = "elasticdash_user_url", skip_serializing_if = "Option::is_none")]
    pub user_url: Option<String>,
    /// Cost in USD.
    #[serde(rename = "elasticdash_cost_usd", skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Input usage units.
    #[serde(rename = "elasticdash_input_units", skip_serializing_if = "Option::is_none")]
    pub input_units: Option<i64>,
    /// Output usage units.
    #[serde(rename = "elasticdash_output_units", skip_serializing_if = "Option::is_none")]
    pub output_units: Option<i64>,
    /// Total usage units.
    #[serde(rename = "elasticdash_total_units", skip_serializing_if = "Option::is_none")]
    pub total_units: Option<i64>,
    /// Generic session id.
    #[serde(rename = "elasticdash_session_id", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning project.
    #[serde(rename = "elasticdash_project_id", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Identified user.
    #[serde(rename = "elasticdash_user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Latency in seconds.
    #[serde(rename = "elasticdash_latency", skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    /// Time to first streamed token in seconds.
    #[serde(rename = "elasticdash_time_to_first_token", skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<f64>,
    /// Application release.
    #[serde(rename = "elasticdash_release", skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Application version.
    #[serde(rename = "elasticdash_version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Model name.
    #[serde(rename = "elasticdash_model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Observation level.
    #[serde(rename = "elasticdash_level", skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Free-form tags of the parent trace.
    #[serde(rename = "elasticdash_tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Deployment environment.
    #[serde(rename = "elasticdash_environment", skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Schema version of the exported event.
    #[serde(rename = "elasticdash_event_version", skip_serializing_if = "Option::is_none")]
    pub event_version: Option<String>,
    /// PostHog client-side session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posthog_session_id: Option<String>,
    /// Mixpanel client-side session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixpanel_session_id: Option<String>,
}

/// Canonical score event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoreEvent {
    /// Score id.
    #[serde(rename = "elasticdash_id")]
    pub id: String,
    /// Score timestamp.
    pub timestamp: DateTime<Utc>,
    /// Score name.
    #[serde(rename = "elasticdash_score_name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Numeric value.
    #[serde(rename = "elasticdash_score_value", skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Free-text comment.
    #[serde(rename = "elasticdash_score_comment", skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Arbitrary JSON metadata.
    #[serde(rename = "elasticdash_score_metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Categorical or boolean value rendered as text.
    #[serde(rename = "elasticdash_score_string_value", skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Score data type (`NUMERIC`, `CATEGORICAL`, `BOOLEAN`).
    #[serde(rename = "elasticdash_score_data_type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Name of the scored trace.
    #[serde(rename = "elasticdash_trace_name", skip_serializing_if = "Option::is_none")]
    pub trace_name: Option<String>,
    /// Id of the scored trace.
    #[serde(rename = "elasticdash_trace_id", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Dashboard URL of the user.
    #[serde(rename = "elasticdash_user_url", skip_serializing_if = "Option::is_none")]
    pub user_url: Option<String>,
    /// Generic session id.
    #[serde(rename = "elasticdash_session_id", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning project.
    #[serde(rename = "elasticdash_project_id", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Identified user.
    #[serde(rename = "elasticdash_user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Application release.
    #[serde(rename = "elasticdash_release", skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Free-form tags of the scored trace.
    #[serde(rename = "elasticdash_tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Deployment environment.
    #[serde(rename = "elasticdash_environment", skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Schema version of the exported event.
    #[serde(rename = "elasticdash_event_version", skip_serializing_if = "Option::is_none")]
    pub event_version: Option<String>,
    /// Entity the score is attached to (`TRACE`, `SESSION`, `DATASET_RUN`).
    #[serde(rename = "elasticdash_score_entity_type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Dataset run the score belongs to.
    #[serde(rename = "elasticdash_dataset_run_id", skip_serializing_if = "Option::is_none")]
    pub dataset_run_id: Option<String>,
    /// PostHog client-side session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posthog_session_id: Option<String>,
    /// Mixpanel client-side session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixpanel_session_id: Option<String>,
}

macro_rules! canonical_event {
    ($ty:ty, $kind:expr) => {
        impl $ty {
            /// Creates an event with the required fields and nothing else.
            pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
                Self { id: id.into(), timestamp, ..Default::default() }
            }
        }

        impl CanonicalEvent for $ty {
            fn kind(&self) -> EventKind {
                $kind
            }

            fn id(&self) -> &str {
                &self.id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }

            fn user_id(&self) -> Option<&str> {
                self.user_id.as_deref()
            }

            fn user_url(&self) -> Option<&str> {
                self.user_url.as_deref()
            }

            fn session_id(&self) -> Option<&str> {
                self.session_id.as_deref()
            }

            fn posthog_session_id(&self) -> Option<&str> {
                self.posthog_session_id.as_deref()
            }

            fn mixpanel_session_id(&self) -> Option<&str> {
                self.mixpanel_session_id.as_deref()
            }

            fn remaining_properties(&self) -> Map<String, Value> {
                to_property_map(self)
            }
        }
    };
}

canonical_event!(TraceEvent, EventKind::Trace);
canonical_event!(GenerationEvent, EventKind::Generation);
canonical_event!(ScoreEvent, EventKind::Score);

/// Serializes an event into its property bag without the destination-native
/// session ids.
fn to_property_map<T: Serialize>(event: &T) -> Map<String, Value> {
    // Plain structs with string keys always serialize to an object.
    let mut map = match serde_json::to_value(event) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    map.remove(POSTHOG_SESSION_ID_KEY);
    map.remove(MIXPANEL_SESSION_ID_KEY);
    map
}

/// Any canonical event, as returned by the event source.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    /// A trace event.
    Trace(TraceEvent),
    /// A generation event.
    Generation(GenerationEvent),
    /// A score event.
    Score(ScoreEvent),
}

impl AnalyticsEvent {
    fn inner(&self) -> &dyn CanonicalEvent {
        match self {
            Self::Trace(event) => event,
            Self::Generation(event) => event,
            Self::Score(event) => event,
        }
    }
}

impl CanonicalEvent for AnalyticsEvent {
    fn kind(&self) -> EventKind {
        self.inner().kind()
    }

    fn id(&self) -> &str {
        self.inner().id()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.inner().timestamp()
    }

    fn user_id(&self) -> Option<&str> {
        self.inner().user_id()
    }

    fn user_url(&self) -> Option<&str> {
        self.inner().user_url()
    }

    fn session_id(&self) -> Option<&str> {
        self.inner().session_id()
    }

    fn posthog_session_id(&self) -> Option<&str> {
        self.inner().posthog_session_id()
    }

    fn mixpanel_session_id(&self) -> Option<&str> {
        self.inner().mixpanel_session_id()
    }

    fn remaining_properties(&self) -> Map<String, Value> {
        self.inner().remaining_properties()
    }
}

impl From<TraceEvent> for AnalyticsEvent {
    fn from(event: TraceEvent) -> Self {
        Self::Trace(event)
    }
}

impl From<GenerationEvent> for AnalyticsEvent {
    fn from(event: GenerationEvent) -> Self {
        Self::Generation(event)
    }
}

impl From<ScoreEvent> for AnalyticsEvent {
    fn from(event: ScoreEvent) -> Self {
        Self::Score(event)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn absent_fields_are_omitted_from_properties() {
        let event = TraceEvent::new("t1", timestamp());
        let properties = event.remaining_properties();

        assert_eq!(properties.len(), 2);
        assert_eq!(properties["elasticdash_id"], json!("t1"));
        assert_eq!(properties["timestamp"], json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn destination_session_ids_are_stripped() {
        let event = GenerationEvent {
            posthog_session_id: Some("ph".to_string()),
            mixpanel_session_id: Some("mp".to_string()),
            session_id: Some("generic".to_string()),
            ..GenerationEvent::new("g1", timestamp())
        };
        let properties = event.remaining_properties();

        assert!(!properties.contains_key(POSTHOG_SESSION_ID_KEY));
        assert!(!properties.contains_key(MIXPANEL_SESSION_ID_KEY));
        assert_eq!(properties["elasticdash_session_id"], json!("generic"));
    }

    #[test]
    fn unknown_keys_are_ignored_on_read() {
        let raw = json!({
            "elasticdash_id": "s1",
            "timestamp": "2024-01-01T00:00:00Z",
            "elasticdash_score_value": 0.5,
            "some_future_column": "ignored",
        });

        let event: ScoreEvent = serde_json::from_value(raw).unwrap();

        assert_eq!(event.id, "s1");
        assert_eq!(event.value, Some(0.5));
        assert!(!event.remaining_properties().contains_key("some_future_column"));
    }

    #[test]
    fn missing_timestamp_is_rejected_on_read() {
        let raw = json!({ "elasticdash_id": "t1" });
        assert!(serde_json::from_value::<TraceEvent>(raw).is_err());
    }

    #[test]
    fn analytics_event_delegates_to_inner_kind() {
        let event = AnalyticsEvent::from(ScoreEvent {
            user_id: Some("u1".to_string()),
            ..ScoreEvent::new("s1", timestamp())
        });

        assert_eq!(event.kind(), EventKind::Score);
        assert_eq!(event.id(), "s1");
        assert_eq!(event.user_id(), Some("u1"));
        assert_eq!(event.kind().to_string(), "score");
    }
}
