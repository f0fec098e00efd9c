//! Pure mappings from canonical events to destination payloads.
//!
//! Every transformer builds its payload in the same order:
//!
//! 1. derive the deterministic id for the destination
//! 2. resolve identity and session
//! 3. write the structural properties
//! 4. copy the remaining canonical fields into keys that are still free
//!
//! Structural properties therefore always win over a canonical field with the
//! same key. Transformers do no I/O and never fail.

use elasticdash_core::EventKind;
use serde_json::{Map, Value};

pub mod mixpanel;
pub mod posthog;

pub use mixpanel::MixpanelEvent;
pub use posthog::PostHogEvent;

/// Adds every canonical field whose key is not taken yet.
fn merge_remaining(properties: &mut Map<String, Value>, remaining: Map<String, Value>) {
    for (key, value) in remaining {
        properties.entry(key).or_insert(value);
    }
}

/// Mixpanel event name of a telemetry kind.
pub const fn mixpanel_event_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Trace => "[ElasticDash] Trace",
        EventKind::Generation => "[ElasticDash] Generation",
        EventKind::Score => "[ElasticDash] Score",
    }
}

/// PostHog event name of a telemetry kind.
pub const fn posthog_event_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Trace => "elasticdash trace",
        EventKind::Generation => "elasticdash generation",
        EventKind::Score => "elasticdash score",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_keeps_existing_keys() {
        let mut properties = Map::new();
        properties.insert("distinct_id".to_string(), json!("structural"));

        let mut remaining = Map::new();
        remaining.insert("distinct_id".to_string(), json!("canonical"));
        remaining.insert("elasticdash_release".to_string(), json!("v1"));

        merge_remaining(&mut properties, remaining);

        assert_eq!(properties["distinct_id"], json!("structural"));
        assert_eq!(properties["elasticdash_release"], json!("v1"));
    }

    #[test]
    fn event_names_per_kind() {
        assert_eq!(mixpanel_event_name(EventKind::Generation), "[ElasticDash] Generation");
        assert_eq!(posthog_event_name(EventKind::Score), "elasticdash score");
    }
}
