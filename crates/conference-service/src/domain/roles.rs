//! Role-change permission evaluation.

use crate::models::ParticipantRole;

/// Decide whether `actor` may change `target`'s role to `new_role`.
///
/// Rules:
/// - the originator may change anyone to anything
/// - a moderator may neither touch originators/moderators nor promote
///   anyone into those roles
/// - everyone else may change nothing
///
/// Callers surface a rejection as a permission-denied error; it is never
/// silently ignored.
#[must_use]
pub fn can_change_role(
    actor: ParticipantRole,
    target: ParticipantRole,
    new_role: ParticipantRole,
) -> bool {
    match actor {
        ParticipantRole::Originator => true,
        ParticipantRole::Moderator => {
            !is_privileged(target) && !is_privileged(new_role)
        }
        _ => false,
    }
}

fn is_privileged(role: ParticipantRole) -> bool {
    matches!(role, ParticipantRole::Originator | ParticipantRole::Moderator)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::ParticipantRole::{
        Assistant, Moderator, Originator, Participant, Speaker,
    };

    #[test]
    fn test_originator_can_change_anything() {
        assert!(can_change_role(Originator, Moderator, Originator));
        assert!(can_change_role(Originator, Participant, Moderator));
        assert!(can_change_role(Originator, Speaker, Participant));
        assert!(can_change_role(Originator, Originator, Participant));
    }

    #[test]
    fn test_moderator_cannot_touch_privileged_targets() {
        assert!(!can_change_role(Moderator, Originator, Participant));
        assert!(!can_change_role(Moderator, Moderator, Participant));
    }

    #[test]
    fn test_moderator_cannot_promote_into_privileged_roles() {
        assert!(!can_change_role(Moderator, Participant, Moderator));
        assert!(!can_change_role(Moderator, Speaker, Originator));
    }

    #[test]
    fn test_moderator_can_manage_ordinary_roles() {
        assert!(can_change_role(Moderator, Participant, Speaker));
        assert!(can_change_role(Moderator, Speaker, Participant));
        assert!(can_change_role(Moderator, Assistant, Speaker));
    }

    #[test]
    fn test_ordinary_roles_can_change_nothing() {
        assert!(!can_change_role(Participant, Participant, Moderator));
        assert!(!can_change_role(Participant, Participant, Speaker));
        assert!(!can_change_role(Speaker, Participant, Participant));
        assert!(!can_change_role(Assistant, Participant, Speaker));
    }
}
