//! Switch event types and header-map parsing.
//!
//! The switch reports everything as a type tag plus a flat string-keyed
//! header map. Parsing is strict about the headers an event class requires
//! and silently ignores the (many) headers it does not care about.

use std::collections::HashMap;
use thiserror::Error;

/// Header carrying the channel correlation id.
const HDR_CHANNEL_UUID: &str = "channel-uuid";

/// Header carrying the hangup cause code.
const HDR_HANGUP_CAUSE: &str = "hangup-cause";

/// Header carrying the switch-assigned conference bridge name.
const HDR_CONFERENCE_NAME: &str = "conference-name";

/// Header carrying the switch's member id within a bridge.
const HDR_MEMBER_ID: &str = "member-id";

/// Flag headers on member-flags events.
const HDR_MUTED: &str = "muted";
const HDR_DEAFENED: &str = "deafened";
const HDR_SPEAKING: &str = "speaking";

/// Event classes the orchestrator subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchEventType {
    /// A signaling channel was created (informational).
    ChannelCreate,
    /// A signaling channel was answered (informational).
    ChannelAnswer,
    /// A signaling channel hung up.
    ChannelHangup,
    /// A member joined a conference bridge.
    ConferenceMemberAdd,
    /// A member's mute/deaf/speaking flags changed.
    ConferenceMemberFlags,
}

impl SwitchEventType {
    /// Wire name of the event class.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchEventType::ChannelCreate => "channel.create",
            SwitchEventType::ChannelAnswer => "channel.answer",
            SwitchEventType::ChannelHangup => "channel.hangup",
            SwitchEventType::ConferenceMemberAdd => "conference.member.add",
            SwitchEventType::ConferenceMemberFlags => "conference.member.flags",
        }
    }

    /// Parse a wire name.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnknownEventType` for anything unrecognized.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        match value {
            "channel.create" => Ok(SwitchEventType::ChannelCreate),
            "channel.answer" => Ok(SwitchEventType::ChannelAnswer),
            "channel.hangup" => Ok(SwitchEventType::ChannelHangup),
            "conference.member.add" => Ok(SwitchEventType::ConferenceMemberAdd),
            "conference.member.flags" => Ok(SwitchEventType::ConferenceMemberFlags),
            other => Err(ParseError::UnknownEventType(other.to_string())),
        }
    }
}

/// Errors raised while decoding a switch event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The type tag names no known event class.
    #[error("Unknown switch event type: {0}")]
    UnknownEventType(String),

    /// A required header was absent.
    #[error("Missing header '{header}' on {event} event")]
    MissingHeader {
        /// Event class wire name.
        event: &'static str,
        /// The absent header key.
        header: &'static str,
    },

    /// A header value could not be interpreted.
    #[error("Invalid value '{value}' for header '{header}'")]
    InvalidHeader {
        /// The offending header key.
        header: &'static str,
        /// The raw value.
        value: String,
    },
}

/// A decoded switch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// Channel created. Informational; carries the correlation id.
    ChannelCreate {
        /// Channel correlation id.
        channel_uuid: String,
    },

    /// Channel answered. Informational.
    ChannelAnswer {
        /// Channel correlation id.
        channel_uuid: String,
    },

    /// Channel hung up.
    ChannelHangup {
        /// Channel correlation id.
        channel_uuid: String,
        /// Switch cause code, e.g. `NORMAL_CLEARING`.
        cause: String,
    },

    /// A real member appeared in a conference bridge.
    ConferenceMemberAdd {
        /// Switch-assigned bridge name.
        conference_name: String,
        /// Switch member id within the bridge.
        member_id: String,
        /// Channel correlation id of the member's leg.
        channel_uuid: String,
    },

    /// A member's flags changed.
    ConferenceMemberFlags {
        /// Channel correlation id of the member's leg.
        channel_uuid: String,
        /// Audio muted.
        muted: bool,
        /// Audio deafened.
        deafened: bool,
        /// Currently speaking (energy detection).
        speaking: bool,
    },
}

impl SwitchEvent {
    /// The event class of this event.
    #[must_use]
    pub fn event_type(&self) -> SwitchEventType {
        match self {
            SwitchEvent::ChannelCreate { .. } => SwitchEventType::ChannelCreate,
            SwitchEvent::ChannelAnswer { .. } => SwitchEventType::ChannelAnswer,
            SwitchEvent::ChannelHangup { .. } => SwitchEventType::ChannelHangup,
            SwitchEvent::ConferenceMemberAdd { .. } => SwitchEventType::ConferenceMemberAdd,
            SwitchEvent::ConferenceMemberFlags { .. } => SwitchEventType::ConferenceMemberFlags,
        }
    }

    /// Decode an event from its type tag and header map.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` for unknown types, missing required headers,
    /// or malformed flag values.
    pub fn from_headers(
        event_type: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ParseError> {
        let event_type = SwitchEventType::parse(event_type)?;
        let wire = event_type.as_str();

        match event_type {
            SwitchEventType::ChannelCreate => Ok(SwitchEvent::ChannelCreate {
                channel_uuid: required(headers, wire, HDR_CHANNEL_UUID)?,
            }),
            SwitchEventType::ChannelAnswer => Ok(SwitchEvent::ChannelAnswer {
                channel_uuid: required(headers, wire, HDR_CHANNEL_UUID)?,
            }),
            SwitchEventType::ChannelHangup => Ok(SwitchEvent::ChannelHangup {
                channel_uuid: required(headers, wire, HDR_CHANNEL_UUID)?,
                cause: headers
                    .get(HDR_HANGUP_CAUSE)
                    .cloned()
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
            }),
            SwitchEventType::ConferenceMemberAdd => Ok(SwitchEvent::ConferenceMemberAdd {
                conference_name: required(headers, wire, HDR_CONFERENCE_NAME)?,
                member_id: required(headers, wire, HDR_MEMBER_ID)?,
                channel_uuid: required(headers, wire, HDR_CHANNEL_UUID)?,
            }),
            SwitchEventType::ConferenceMemberFlags => Ok(SwitchEvent::ConferenceMemberFlags {
                channel_uuid: required(headers, wire, HDR_CHANNEL_UUID)?,
                muted: flag(headers, HDR_MUTED)?,
                deafened: flag(headers, HDR_DEAFENED)?,
                speaking: flag(headers, HDR_SPEAKING)?,
            }),
        }
    }
}

fn required(
    headers: &HashMap<String, String>,
    event: &'static str,
    header: &'static str,
) -> Result<String, ParseError> {
    headers
        .get(header)
        .map(String::clone)
        .ok_or(ParseError::MissingHeader { event, header })
}

/// Flag headers default to false when absent; present values must be
/// "true" or "false".
fn flag(headers: &HashMap<String, String>, header: &'static str) -> Result<bool, ParseError> {
    match headers.get(header).map(String::as_str) {
        None => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ParseError::InvalidHeader {
            header,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_event_type_round_trip() {
        for event_type in [
            SwitchEventType::ChannelCreate,
            SwitchEventType::ChannelAnswer,
            SwitchEventType::ChannelHangup,
            SwitchEventType::ConferenceMemberAdd,
            SwitchEventType::ConferenceMemberFlags,
        ] {
            assert_eq!(
                SwitchEventType::parse(event_type.as_str()).unwrap(),
                event_type
            );
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let result = SwitchEventType::parse("channel.bridge");
        assert_eq!(
            result,
            Err(ParseError::UnknownEventType("channel.bridge".to_string()))
        );
    }

    #[test]
    fn test_parse_hangup() {
        let event = SwitchEvent::from_headers(
            "channel.hangup",
            &headers(&[
                ("channel-uuid", "abc-123"),
                ("hangup-cause", "NORMAL_CLEARING"),
            ]),
        )
        .unwrap();

        assert_eq!(
            event,
            SwitchEvent::ChannelHangup {
                channel_uuid: "abc-123".to_string(),
                cause: "NORMAL_CLEARING".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_hangup_without_cause_defaults_unknown() {
        let event =
            SwitchEvent::from_headers("channel.hangup", &headers(&[("channel-uuid", "abc-123")]))
                .unwrap();

        assert!(matches!(
            event,
            SwitchEvent::ChannelHangup { cause, .. } if cause == "UNKNOWN"
        ));
    }

    #[test]
    fn test_parse_hangup_missing_channel_uuid() {
        let result =
            SwitchEvent::from_headers("channel.hangup", &headers(&[("hangup-cause", "REJECTED")]));

        assert_eq!(
            result,
            Err(ParseError::MissingHeader {
                event: "channel.hangup",
                header: "channel-uuid",
            })
        );
    }

    #[test]
    fn test_parse_member_add() {
        let event = SwitchEvent::from_headers(
            "conference.member.add",
            &headers(&[
                ("conference-name", "conf-42"),
                ("member-id", "7"),
                ("channel-uuid", "abc-123"),
                ("some-extra-header", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(
            event,
            SwitchEvent::ConferenceMemberAdd {
                conference_name: "conf-42".to_string(),
                member_id: "7".to_string(),
                channel_uuid: "abc-123".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_member_flags() {
        let event = SwitchEvent::from_headers(
            "conference.member.flags",
            &headers(&[
                ("channel-uuid", "abc-123"),
                ("muted", "true"),
                ("speaking", "false"),
            ]),
        )
        .unwrap();

        // deafened absent -> false
        assert_eq!(
            event,
            SwitchEvent::ConferenceMemberFlags {
                channel_uuid: "abc-123".to_string(),
                muted: true,
                deafened: false,
                speaking: false,
            }
        );
    }

    #[test]
    fn test_parse_member_flags_invalid_flag_value() {
        let result = SwitchEvent::from_headers(
            "conference.member.flags",
            &headers(&[("channel-uuid", "abc-123"), ("muted", "yes")]),
        );

        assert_eq!(
            result,
            Err(ParseError::InvalidHeader {
                header: "muted",
                value: "yes".to_string(),
            })
        );
    }

    #[test]
    fn test_event_type_accessor() {
        let event = SwitchEvent::ChannelCreate {
            channel_uuid: "abc".to_string(),
        };
        assert_eq!(event.event_type(), SwitchEventType::ChannelCreate);
    }
}
