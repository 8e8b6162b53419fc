//! Signaling relay routing policy.
//!
//! A pure function of (room membership, envelope) to a recipient set.
//! The relay never inspects the payload blob; integrity is the peers'
//! problem. Routing is strictly room-scoped: an untargeted offer or
//! candidate reaches every other member of the sender's room and nobody
//! beyond it.

use crate::errors::CoreError;
use crate::events::{Member, SignalKind, SignalingEnvelope};
use common::types::ConnectionId;

/// Where an envelope should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// Deliver to every listed member and mirror to sibling instances so
    /// remote members of the same room receive it too.
    Broadcast {
        /// Local recipients, sender excluded.
        recipients: Vec<ConnectionId>,
    },
    /// Deliver to exactly one in-room peer, locally.
    Direct {
        /// The explicit target.
        recipient: ConnectionId,
    },
}

/// Compute the recipient set for an envelope against a room's membership.
///
/// Policy:
/// - offer / candidate with no target: all members except the sender.
/// - answer, or any envelope with an explicit target: that single target,
///   provided it is a member of the sender's room.
///
/// # Errors
///
/// - [`CoreError::NotInRoom`] if the sender is not in the membership list
///   (a late envelope from a connection that already left).
/// - [`CoreError::TargetNotInRoom`] if an explicit target is absent, or an
///   answer arrives with no target to resolve.
pub fn route(members: &[Member], envelope: &SignalingEnvelope) -> Result<RelayDecision, CoreError> {
    if !members.iter().any(|m| m.connection_id == envelope.sender) {
        return Err(CoreError::NotInRoom);
    }

    match (envelope.kind, envelope.target) {
        (_, Some(target)) => {
            if target == envelope.sender || !members.iter().any(|m| m.connection_id == target) {
                return Err(CoreError::TargetNotInRoom(target));
            }
            Ok(RelayDecision::Direct { recipient: target })
        }
        // An answer is a reply to one peer; without a target there is
        // nobody to resolve it to.
        (SignalKind::Answer, None) => Err(CoreError::TargetNotInRoom(envelope.sender)),
        (SignalKind::Offer | SignalKind::Candidate, None) => {
            let recipients = members
                .iter()
                .map(|m| m.connection_id)
                .filter(|id| *id != envelope.sender)
                .collect();
            Ok(RelayDecision::Broadcast { recipients })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(id: u64, name: &str) -> Member {
        Member {
            connection_id: ConnectionId(id),
            display_name: name.to_string(),
            admin: false,
        }
    }

    fn envelope(kind: SignalKind, sender: u64, target: Option<u64>) -> SignalingEnvelope {
        SignalingEnvelope {
            kind,
            sender: ConnectionId(sender),
            target: target.map(ConnectionId),
            payload: json!({"sdp": "v=0"}),
        }
    }

    #[test]
    fn untargeted_offer_reaches_everyone_but_sender() {
        let members = vec![member(1, "alice"), member(2, "bob"), member(3, "carol")];
        let decision = route(&members, &envelope(SignalKind::Offer, 2, None)).unwrap();

        match decision {
            RelayDecision::Broadcast { mut recipients } => {
                recipients.sort();
                assert_eq!(recipients, vec![ConnectionId(1), ConnectionId(3)]);
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[test]
    fn untargeted_candidate_broadcasts() {
        let members = vec![member(1, "alice"), member(2, "bob")];
        let decision = route(&members, &envelope(SignalKind::Candidate, 1, None)).unwrap();
        assert_eq!(
            decision,
            RelayDecision::Broadcast {
                recipients: vec![ConnectionId(2)],
            }
        );
    }

    #[test]
    fn targeted_answer_reaches_only_that_peer() {
        let members = vec![member(1, "alice"), member(2, "bob"), member(3, "carol")];
        let decision = route(&members, &envelope(SignalKind::Answer, 2, Some(1))).unwrap();
        assert_eq!(
            decision,
            RelayDecision::Direct {
                recipient: ConnectionId(1),
            }
        );
    }

    #[test]
    fn targeted_envelope_to_absent_peer_is_dropped() {
        let members = vec![member(1, "alice"), member(2, "bob")];
        let result = route(&members, &envelope(SignalKind::Answer, 1, Some(9)));
        assert!(matches!(
            result,
            Err(CoreError::TargetNotInRoom(ConnectionId(9)))
        ));
    }

    #[test]
    fn targeted_offer_is_also_directed() {
        let members = vec![member(1, "alice"), member(2, "bob"), member(3, "carol")];
        let decision = route(&members, &envelope(SignalKind::Offer, 1, Some(3))).unwrap();
        assert_eq!(
            decision,
            RelayDecision::Direct {
                recipient: ConnectionId(3),
            }
        );
    }

    #[test]
    fn answer_without_target_is_dropped() {
        let members = vec![member(1, "alice"), member(2, "bob")];
        let result = route(&members, &envelope(SignalKind::Answer, 1, None));
        assert!(matches!(result, Err(CoreError::TargetNotInRoom(_))));
    }

    #[test]
    fn self_targeted_envelope_is_dropped() {
        let members = vec![member(1, "alice"), member(2, "bob")];
        let result = route(&members, &envelope(SignalKind::Offer, 1, Some(1)));
        assert!(matches!(result, Err(CoreError::TargetNotInRoom(_))));
    }

    #[test]
    fn sender_outside_membership_is_rejected() {
        let members = vec![member(1, "alice")];
        let result = route(&members, &envelope(SignalKind::Offer, 9, None));
        assert!(matches!(result, Err(CoreError::NotInRoom)));
    }

    #[test]
    fn lone_member_broadcast_has_no_recipients() {
        let members = vec![member(1, "alice")];
        let decision = route(&members, &envelope(SignalKind::Offer, 1, None)).unwrap();
        assert_eq!(
            decision,
            RelayDecision::Broadcast {
                recipients: Vec::new(),
            }
        );
    }
}
