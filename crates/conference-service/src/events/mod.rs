//! Domain event publishing boundary.
//!
//! The orchestrator emits exactly one typed event per state transition.
//! Payloads carry the full post-transition entity state so downstream
//! consumers never need a read-back. Delivery is best-effort relative to
//! the authoritative state change: a publish failure is logged and counted,
//! never rolled back into the transition.

use crate::models::{ConferenceRow, ParticipantRow, ReminderRow};
use crate::observability::metrics;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// A domain event with its full post-transition payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// An ad-hoc conference was created (and is immediately active).
    #[serde(rename = "conference.created")]
    ConferenceCreated {
        /// Post-creation conference state.
        conference: ConferenceRow,
    },

    /// A scheduled or recurring conference was created.
    #[serde(rename = "conference.scheduled")]
    ConferenceScheduled {
        /// Post-creation conference state.
        conference: ConferenceRow,
    },

    /// A conference reached its terminal state.
    #[serde(rename = "conference.ended")]
    ConferenceEnded {
        /// Terminal conference state.
        conference: ConferenceRow,
    },

    /// A not-yet-started conference was cancelled and removed.
    #[serde(rename = "conference.cancelled")]
    ConferenceCancelled {
        /// The conference as it was at removal.
        conference: ConferenceRow,
    },

    /// A participant answered (or changed) an RSVP.
    #[serde(rename = "conference.rsvp_updated")]
    RsvpUpdated {
        /// Conference with recomputed accept/decline counters.
        conference: ConferenceRow,
        /// The participant whose answer changed.
        participant: ParticipantRow,
    },

    /// A reminder came due.
    #[serde(rename = "conference.reminder")]
    Reminder {
        /// The conference being reminded about.
        conference: ConferenceRow,
        /// The reminder that fired.
        reminder: ReminderRow,
    },

    /// A participant was bound to a live channel.
    #[serde(rename = "participant.joined")]
    ParticipantJoined {
        /// Post-transition participant state.
        participant: ParticipantRow,
    },

    /// A participant disconnected (hangup, kick, or leave).
    #[serde(rename = "participant.left")]
    ParticipantLeft {
        /// Post-transition participant state.
        participant: ParticipantRow,
    },

    /// A participant's mute flag changed.
    #[serde(rename = "participant.muted")]
    ParticipantMuted {
        /// Post-transition participant state.
        participant: ParticipantRow,
    },

    /// A participant's speaking flag changed.
    #[serde(rename = "participant.speaking")]
    ParticipantSpeaking {
        /// Post-transition participant state.
        participant: ParticipantRow,
    },

    /// A participant's role changed.
    #[serde(rename = "participant.role_changed")]
    ParticipantRoleChanged {
        /// Post-transition participant state.
        participant: ParticipantRow,
    },
}

impl DomainEvent {
    /// The event's wire name (the serde tag).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ConferenceCreated { .. } => "conference.created",
            DomainEvent::ConferenceScheduled { .. } => "conference.scheduled",
            DomainEvent::ConferenceEnded { .. } => "conference.ended",
            DomainEvent::ConferenceCancelled { .. } => "conference.cancelled",
            DomainEvent::RsvpUpdated { .. } => "conference.rsvp_updated",
            DomainEvent::Reminder { .. } => "conference.reminder",
            DomainEvent::ParticipantJoined { .. } => "participant.joined",
            DomainEvent::ParticipantLeft { .. } => "participant.left",
            DomainEvent::ParticipantMuted { .. } => "participant.muted",
            DomainEvent::ParticipantSpeaking { .. } => "participant.speaking",
            DomainEvent::ParticipantRoleChanged { .. } => "participant.role_changed",
        }
    }
}

/// Errors raised by publisher implementations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The event could not be serialized.
    #[error("Event serialization failed: {0}")]
    Serialize(String),

    /// The event bus rejected or dropped the publish.
    #[error("Event bus error: {0}")]
    Bus(String),
}

/// Trait for event publishing (enables mocking).
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one domain event.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` when serialization or the bus write fails.
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Publish an event, logging and counting a failure instead of surfacing it.
///
/// This is the only way state-transition code publishes: the transition is
/// already committed, so the caller has nothing useful to do with the error.
/// Reminder delivery is the one exception and calls `publish` directly so an
/// unsent reminder can be retried.
pub async fn publish_best_effort(publisher: &dyn EventPublisher, event: DomainEvent) {
    if let Err(e) = publisher.publish(&event).await {
        metrics::record_publish_failure(event.name());
        warn!(
            target: "conf.events",
            event = event.name(),
            error = %e,
            "Failed to publish domain event, state change stands"
        );
    }
}

/// Redis pub/sub publisher.
///
/// Events are published as JSON to a single configurable channel. The
/// `MultiplexedConnection` is designed to be cloned cheaply and used
/// concurrently, so no locking is needed.
#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: redis::aio::MultiplexedConnection,
    channel: String,
}

impl RedisEventPublisher {
    /// Connect to Redis and build a publisher for `channel`.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Bus` when the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str, channel: String) -> Result<Self, PublishError> {
        // Do NOT log redis_url as it may contain credentials.
        let client = redis::Client::open(redis_url)
            .map_err(|e| PublishError::Bus(format!("Failed to open Redis client: {e}")))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PublishError::Bus(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self { connection, channel })
    }
}

#[async_trait::async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(event).map_err(|e| PublishError::Serialize(e.to_string()))?;

        let mut connection = self.connection.clone();
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut connection)
            .await
            .map_err(|e| PublishError::Bus(e.to_string()))?;

        Ok(())
    }
}

/// Mock publisher module for testing.
pub mod mock {
    use super::{DomainEvent, EventPublisher, PublishError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Recording publisher for unit and integration tests.
    ///
    /// Captures every published event; can be switched into a failing mode
    /// to exercise best-effort and retry paths.
    #[derive(Default)]
    pub struct RecordingPublisher {
        events: Mutex<Vec<DomainEvent>>,
        failing: AtomicBool,
    }

    impl RecordingPublisher {
        /// Create a recording publisher that accepts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a publisher whose publishes all fail.
        #[must_use]
        pub fn failing() -> Self {
            let publisher = Self::default();
            publisher.failing.store(true, Ordering::SeqCst);
            publisher
        }

        /// Switch failure mode on or off.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Snapshot of everything published so far.
        #[must_use]
        pub fn events(&self) -> Vec<DomainEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }

        /// Wire names of everything published so far, in order.
        #[must_use]
        pub fn names(&self) -> Vec<&'static str> {
            self.events().iter().map(DomainEvent::name).collect()
        }

        /// How many events with the given wire name were published.
        #[must_use]
        pub fn count_of(&self, name: &str) -> usize {
            self.events()
                .iter()
                .filter(|event| event.name() == name)
                .count()
        }
    }

    #[async_trait::async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PublishError::Bus("mock publisher failure".to_string()));
            }
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::mock::RecordingPublisher;
    use super::*;
    use crate::models::ConferenceRow;
    use chrono::Utc;
    use uuid::Uuid;

    fn conference() -> ConferenceRow {
        let now = Utc::now();
        ConferenceRow {
            conference_id: Uuid::nil(),
            name: "Standup".to_string(),
            chat_id: None,
            event_type: "adhoc".to_string(),
            status: "active".to_string(),
            switch_name: "conf-00000000".to_string(),
            max_members: 50,
            is_private: false,
            recording_path: None,
            accepted_count: 0,
            declined_count: 0,
            series_id: None,
            scheduled_at: None,
            started_at: Some(now),
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag_and_full_state() {
        let event = DomainEvent::ConferenceCreated {
            conference: conference(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conference.created");
        assert_eq!(json["conference"]["name"], "Standup");
        assert_eq!(json["conference"]["status"], "active");
        assert_eq!(json["conference"]["max_members"], 50);
    }

    #[test]
    fn test_event_names_match_serde_tags() {
        let event = DomainEvent::ConferenceEnded {
            conference: conference(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }

    #[tokio::test]
    async fn test_recording_publisher_captures_events() {
        let publisher = RecordingPublisher::new();
        publisher
            .publish(&DomainEvent::ConferenceCreated {
                conference: conference(),
            })
            .await
            .unwrap();

        assert_eq!(publisher.names(), vec!["conference.created"]);
        assert_eq!(publisher.count_of("conference.created"), 1);
        assert_eq!(publisher.count_of("conference.ended"), 0);
    }

    #[tokio::test]
    async fn test_publish_best_effort_swallows_failures() {
        let publisher = RecordingPublisher::failing();
        // Must not panic or surface the error.
        publish_best_effort(
            &publisher,
            DomainEvent::ConferenceCreated {
                conference: conference(),
            },
        )
        .await;

        assert!(publisher.events().is_empty());
    }
}
