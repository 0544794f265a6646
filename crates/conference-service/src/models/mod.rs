//! Conference orchestrator data models.
//!
//! Row structs mirror the database schema and double as the full-state
//! payloads of domain events, so they derive `Serialize`. Status-like
//! columns are stored as strings; the enums below own the legal values and
//! the conversions, and SQL predicates use the same literals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conference kind, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Created for immediate use, no schedule.
    Adhoc,
    /// Ad-hoc call attached to an existing chat.
    AdhocChat,
    /// Scheduled for a future time.
    Scheduled,
    /// Scheduled and repeating per a recurrence rule.
    Recurring,
}

impl EventType {
    /// Returns the string representation of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Adhoc => "adhoc",
            EventType::AdhocChat => "adhoc_chat",
            EventType::Scheduled => "scheduled",
            EventType::Recurring => "recurring",
        }
    }

    /// Parse a stored value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "adhoc" => Some(EventType::Adhoc),
            "adhoc_chat" => Some(EventType::AdhocChat),
            "scheduled" => Some(EventType::Scheduled),
            "recurring" => Some(EventType::Recurring),
            _ => None,
        }
    }

    /// Whether this kind carries a schedule (and therefore RSVPs/reminders).
    #[must_use]
    pub fn is_scheduled_kind(&self) -> bool {
        matches!(self, EventType::Scheduled | EventType::Recurring)
    }
}

/// Conference lifecycle state.
///
/// Cancelled conferences are removed from the active set, not modeled as a
/// fourth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConferenceStatus {
    /// Created but not yet active.
    Scheduled,
    /// In progress.
    Active,
    /// Terminal.
    Ended,
}

impl ConferenceStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConferenceStatus::Scheduled => "scheduled",
            ConferenceStatus::Active => "active",
            ConferenceStatus::Ended => "ended",
        }
    }

    /// Parse a stored value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(ConferenceStatus::Scheduled),
            "active" => Some(ConferenceStatus::Active),
            "ended" => Some(ConferenceStatus::Ended),
            _ => None,
        }
    }
}

/// Participant connection state for one join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Join command accepted, real channel not yet established.
    Connecting,
    /// Bound to a live switch channel.
    Connected,
    /// Not connected. Also the state of invited users who never joined.
    Disconnected,
}

impl ParticipantStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Connecting => "connecting",
            ParticipantStatus::Connected => "connected",
            ParticipantStatus::Disconnected => "disconnected",
        }
    }

    /// Parse a stored value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "connecting" => Some(ParticipantStatus::Connecting),
            "connected" => Some(ParticipantStatus::Connected),
            "disconnected" => Some(ParticipantStatus::Disconnected),
            _ => None,
        }
    }
}

/// Participant role within a conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The creator. The only role nobody can be promoted into.
    Originator,
    /// May moderate non-moderators.
    Moderator,
    /// May speak in moderated conferences.
    Speaker,
    /// Organizer's assistant.
    Assistant,
    /// Default.
    Participant,
}

impl ParticipantRole {
    /// Returns the string representation of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Originator => "originator",
            ParticipantRole::Moderator => "moderator",
            ParticipantRole::Speaker => "speaker",
            ParticipantRole::Assistant => "assistant",
            ParticipantRole::Participant => "participant",
        }
    }

    /// Parse a stored value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "originator" => Some(ParticipantRole::Originator),
            "moderator" => Some(ParticipantRole::Moderator),
            "speaker" => Some(ParticipantRole::Speaker),
            "assistant" => Some(ParticipantRole::Assistant),
            "participant" => Some(ParticipantRole::Participant),
            _ => None,
        }
    }
}

/// RSVP state; meaningful only for scheduled/recurring conferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    /// No answer yet.
    Pending,
    /// Will attend.
    Accepted,
    /// Will not attend.
    Declined,
}

impl RsvpStatus {
    /// Returns the string representation of the RSVP status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RsvpStatus::Pending => "pending",
            RsvpStatus::Accepted => "accepted",
            RsvpStatus::Declined => "declined",
        }
    }

    /// Parse a stored value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RsvpStatus::Pending),
            "accepted" => Some(RsvpStatus::Accepted),
            "declined" => Some(RsvpStatus::Declined),
            _ => None,
        }
    }
}

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceFrequency {
    /// Every day.
    Daily,
    /// Every week, optionally on specific weekdays.
    Weekly,
    /// Every other week on specific weekdays.
    Biweekly,
    /// Every month, optionally on a fixed day of month.
    Monthly,
}

impl RecurrenceFrequency {
    /// Returns the string representation of the frequency.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceFrequency::Daily => "daily",
            RecurrenceFrequency::Weekly => "weekly",
            RecurrenceFrequency::Biweekly => "biweekly",
            RecurrenceFrequency::Monthly => "monthly",
        }
    }

    /// Parse a stored value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(RecurrenceFrequency::Daily),
            "weekly" => Some(RecurrenceFrequency::Weekly),
            "biweekly" => Some(RecurrenceFrequency::Biweekly),
            "monthly" => Some(RecurrenceFrequency::Monthly),
            _ => None,
        }
    }
}

/// Conference database row. The aggregate root.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConferenceRow {
    /// Unique conference identifier.
    pub conference_id: Uuid,

    /// Human-readable conference name.
    pub name: String,

    /// Parent chat, when the call was started from one.
    pub chat_id: Option<Uuid>,

    /// Conference kind; see `EventType`. Immutable.
    pub event_type: String,

    /// Lifecycle state; see `ConferenceStatus`.
    pub status: String,

    /// Name the telephony switch knows the bridge by.
    pub switch_name: String,

    /// Maximum number of simultaneous members.
    pub max_members: i32,

    /// Whether the conference is invitation-only.
    pub is_private: bool,

    /// Recording location; written once when recording starts.
    pub recording_path: Option<String>,

    /// Count of participants with rsvp_status = accepted. Maintained
    /// transactionally with every RSVP write, insert, or delete.
    pub accepted_count: i32,

    /// Count of participants with rsvp_status = declined. Maintained like
    /// `accepted_count`.
    pub declined_count: i32,

    /// Links instances generated from one recurring definition.
    pub series_id: Option<Uuid>,

    /// Scheduled start; required for scheduled/recurring kinds.
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Set on first real activity. Non-null whenever status is
    /// active or ended.
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal timestamp. Non-null iff status is ended.
    pub ended_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Participant database row: one logical row per user per conference.
///
/// Rejoins reuse the row (back to `connecting`, channel binding cleared),
/// so at most one live row per (conference, user) exists by construction.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ParticipantRow {
    /// Unique participant identifier.
    pub participant_id: Uuid,

    /// Owning conference.
    pub conference_id: Uuid,

    /// Platform user.
    pub user_id: Uuid,

    /// Connection state; see `ParticipantStatus`.
    pub status: String,

    /// Role; see `ParticipantRole`.
    pub role: String,

    /// RSVP answer; see `RsvpStatus`.
    pub rsvp_status: String,

    /// Correlation key to the live switch channel, set once on association.
    pub channel_uuid: Option<String>,

    /// The switch's member id within the bridge.
    pub fs_member_id: Option<String>,

    /// Audio muted.
    pub is_muted: bool,

    /// Audio deafened.
    pub is_deaf: bool,

    /// Currently speaking.
    pub is_speaking: bool,

    /// Set on transition into connected.
    pub joined_at: Option<DateTime<Utc>>,

    /// Set on transition into disconnected.
    pub left_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp; also when `connecting` began, which the
    /// stale-connecting sweep keys on.
    pub updated_at: DateTime<Utc>,
}

/// Recurrence rule row, 1:1 with its defining recurring conference.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecurrenceRuleRow {
    /// Unique rule identifier.
    pub rule_id: Uuid,

    /// The defining recurring conference.
    pub conference_id: Uuid,

    /// Frequency; see `RecurrenceFrequency`.
    pub frequency: String,

    /// Weekday ordinals (ISO, Monday = 0). Weekly/biweekly only.
    pub days_of_week: Vec<i16>,

    /// Day of month. Monthly only.
    pub day_of_month: Option<i16>,

    /// Exclusive upper bound for generated occurrences.
    pub until: Option<DateTime<Utc>>,

    /// Maximum number of occurrences; enforced by the scheduler, not the
    /// calculator.
    pub occurrence_count: Option<i32>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Reminder row. Created once per participant at schedule time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReminderRow {
    /// Unique reminder identifier.
    pub reminder_id: Uuid,

    /// Owning conference.
    pub conference_id: Uuid,

    /// User to remind.
    pub user_id: Uuid,

    /// When to fire: scheduled_at minus `minutes_before`. Immutable.
    pub remind_at: DateTime<Utc>,

    /// Lead time in minutes.
    pub minutes_before: i32,

    /// Flips exactly once.
    pub sent: bool,

    /// When the reminder event was published.
    pub sent_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
