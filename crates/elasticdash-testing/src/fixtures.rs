//! Builders for canonical events with deterministic defaults.

use chrono::{DateTime, TimeZone, Utc};
use elasticdash_core::{
    AnalyticsEvent, EventKind, GenerationEvent, ScoreEvent, TraceEvent,
};
use serde_json::Value;
use uuid::Uuid;

/// Fixed instant used as the default event timestamp.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid fixed timestamp")
}

/// Builder for trace, generation and score events.
///
/// Only the fields the transformers treat specially are settable here;
/// everything else stays `None` unless set on the built event directly.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: EventKind,
    id: String,
    timestamp: DateTime<Utc>,
    project_id: Option<String>,
    name: Option<String>,
    user_id: Option<String>,
    user_url: Option<String>,
    session_id: Option<String>,
    posthog_session_id: Option<String>,
    mixpanel_session_id: Option<String>,
    tags: Option<Vec<String>>,
    score_value: Option<f64>,
    score_metadata: Option<Value>,
}

impl EventBuilder {
    fn new(kind: EventKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            timestamp: fixed_time(),
            project_id: None,
            name: None,
            user_id: None,
            user_url: None,
            session_id: None,
            posthog_session_id: None,
            mixpanel_session_id: None,
            tags: None,
            score_value: None,
            score_metadata: None,
        }
    }

    /// Starts a trace event.
    pub fn trace(id: impl Into<String>) -> Self {
        Self::new(EventKind::Trace, id)
    }

    /// Starts a generation event.
    pub fn generation(id: impl Into<String>) -> Self {
        Self::new(EventKind::Generation, id)
    }

    /// Starts a score event.
    pub fn score(id: impl Into<String>) -> Self {
        Self::new(EventKind::Score, id)
    }

    /// Starts a trace event with a random id.
    pub fn random_trace() -> Self {
        Self::trace(format!("trace_{}", Uuid::new_v4().simple()))
    }

    /// Sets the event timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the owning project.
    #[must_use]
    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Sets the trace, generation or score name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the user id.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the user's profile URL.
    #[must_use]
    pub fn user_url(mut self, url: impl Into<String>) -> Self {
        self.user_url = Some(url.into());
        self
    }

    /// Sets the generic session id.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the PostHog-native session id.
    #[must_use]
    pub fn posthog_session(mut self, session_id: impl Into<String>) -> Self {
        self.posthog_session_id = Some(session_id.into());
        self
    }

    /// Sets the Mixpanel-native session id.
    #[must_use]
    pub fn mixpanel_session(mut self, session_id: impl Into<String>) -> Self {
        self.mixpanel_session_id = Some(session_id.into());
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the numeric score value. Ignored for other kinds.
    #[must_use]
    pub fn value(mut self, value: f64) -> Self {
        self.score_value = Some(value);
        self
    }

    /// Sets the score metadata. Ignored for other kinds.
    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.score_metadata = Some(metadata);
        self
    }

    /// Builds the event.
    pub fn build(self) -> AnalyticsEvent {
        match self.kind {
            EventKind::Trace => AnalyticsEvent::Trace(TraceEvent {
                trace_name: self.name,
                project_id: self.project_id,
                user_id: self.user_id,
                user_url: self.user_url,
                session_id: self.session_id,
                posthog_session_id: self.posthog_session_id,
                mixpanel_session_id: self.mixpanel_session_id,
                tags: self.tags,
                ..TraceEvent::new(self.id, self.timestamp)
            }),
            EventKind::Generation => AnalyticsEvent::Generation(GenerationEvent {
                generation_name: self.name,
                project_id: self.project_id,
                user_id: self.user_id,
                user_url: self.user_url,
                session_id: self.session_id,
                posthog_session_id: self.posthog_session_id,
                mixpanel_session_id: self.mixpanel_session_id,
                tags: self.tags,
                ..GenerationEvent::new(self.id, self.timestamp)
            }),
            EventKind::Score => AnalyticsEvent::Score(ScoreEvent {
                name: self.name,
                value: self.score_value,
                metadata: self.score_metadata,
                project_id: self.project_id,
                user_id: self.user_id,
                user_url: self.user_url,
                session_id: self.session_id,
                posthog_session_id: self.posthog_session_id,
                mixpanel_session_id: self.mixpanel_session_id,
                tags: self.tags,
                ..ScoreEvent::new(self.id, self.timestamp)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use elasticdash_core::CanonicalEvent;

    use super::*;

    #[test]
    fn builder_sets_shared_fields_for_every_kind() {
        let builders =
            [EventBuilder::trace("e1"), EventBuilder::generation("e1"), EventBuilder::score("e1")];
        for builder in builders {
            let event = builder.user("u1").session("s1").build();

            assert_eq!(event.id(), "e1");
            assert_eq!(event.user_id(), Some("u1"));
            assert_eq!(event.session_id(), Some("s1"));
            assert_eq!(event.timestamp(), fixed_time());
        }
    }
}
