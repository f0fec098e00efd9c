//! Deterministic identity and session resolution.
//!
//! Each destination hashes `"{project_id}-{event_id}"` into a UUID v5 under its
//! own namespace. The result is the destination's deduplication key and the
//! anonymous identity of events without a user, so re-exporting an event
//! always produces the same id.

use uuid::{uuid, Uuid};

/// UUID v5 namespace of Mixpanel-bound ids.
pub const MIXPANEL_NAMESPACE: Uuid = uuid!("8f7c3e42-9a1b-4d5f-8e2a-1c6b9d3f4e7a");

/// UUID v5 namespace of PostHog-bound ids.
pub const POSTHOG_NAMESPACE: Uuid = uuid!("0f6c91df-d035-4813-b838-9741ba38ef0b");

/// Derives the id of `event_id` in `project_id` under `namespace`.
pub fn deterministic_id(namespace: &Uuid, project_id: &str, event_id: &str) -> Uuid {
    Uuid::new_v5(namespace, format!("{project_id}-{event_id}").as_bytes())
}

/// Who an exported event is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistinctId {
    /// A known user.
    Identified(String),
    /// No user; the deterministic id stands in.
    Anonymous(Uuid),
}

impl DistinctId {
    /// Resolves the identity of an event.
    ///
    /// An empty user id counts as no user.
    pub fn resolve(user_id: Option<&str>, fallback: Uuid) -> Self {
        match non_empty(user_id) {
            Some(user_id) => Self::Identified(user_id.to_string()),
            None => Self::Anonymous(fallback),
        }
    }

    /// Whether the event is attributed to a known user.
    pub fn is_identified(&self) -> bool {
        matches!(self, Self::Identified(_))
    }

    /// Identity as sent to the destination.
    pub fn into_string(self) -> String {
        match self {
            Self::Identified(user_id) => user_id,
            Self::Anonymous(id) => id.to_string(),
        }
    }
}

/// Picks the session id to export.
///
/// The destination-native id wins when present and non-empty, then the
/// generic session id under the same rule, otherwise there is no session.
pub fn resolve_session_id<'a>(
    native: Option<&'a str>,
    generic: Option<&'a str>,
) -> Option<&'a str> {
    non_empty(native).or_else(|| non_empty(generic))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_version_5() {
        let id = deterministic_id(&POSTHOG_NAMESPACE, "p1", "t1");

        assert_eq!(id.get_version_num(), 5);
        assert_eq!(id, deterministic_id(&POSTHOG_NAMESPACE, "p1", "t1"));
    }

    #[test]
    fn namespaces_separate_destinations() {
        assert_ne!(
            deterministic_id(&POSTHOG_NAMESPACE, "p1", "t1"),
            deterministic_id(&MIXPANEL_NAMESPACE, "p1", "t1")
        );
    }

    #[test]
    fn project_is_part_of_the_name() {
        assert_ne!(
            deterministic_id(&MIXPANEL_NAMESPACE, "p1", "t1"),
            deterministic_id(&MIXPANEL_NAMESPACE, "p2", "t1")
        );
    }

    #[test]
    fn empty_user_id_is_anonymous() {
        let fallback = Uuid::nil();

        assert_eq!(DistinctId::resolve(Some(""), fallback), DistinctId::Anonymous(fallback));
        assert_eq!(DistinctId::resolve(None, fallback), DistinctId::Anonymous(fallback));
        assert!(DistinctId::resolve(Some("u1"), fallback).is_identified());
    }

    #[test]
    fn session_resolution_prefers_native_then_generic() {
        assert_eq!(resolve_session_id(Some("A"), Some("B")), Some("A"));
        assert_eq!(resolve_session_id(None, Some("B")), Some("B"));
        assert_eq!(resolve_session_id(Some(""), Some("B")), Some("B"));
        assert_eq!(resolve_session_id(Some(""), Some("")), None);
        assert_eq!(resolve_session_id(None, None), None);
    }
}
