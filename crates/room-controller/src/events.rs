//! Wire-level event types.
//!
//! Inbound [`ClientEvent`] and outbound [`ServerEvent`] are the complete
//! vocabulary between a transport adapter and the session coordinator.
//! Both serialize as internally tagged JSON (`{"event": "...", ...}`).
//!
//! Signaling payloads (SDP offers/answers, ICE candidates) are opaque:
//! they are carried as raw [`serde_json::Value`] and forwarded
//! byte-for-byte, annotated with the sender's connection id.

use chrono::{DateTime, Utc};
use common::types::ConnectionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A room member as seen by peers and the room directory.
///
/// Display name and admin flag are captured once at join time from the
/// connection's identity binding and are not re-derived afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Connection id of the member.
    pub connection_id: ConnectionId,
    /// Display name chosen at join time.
    pub display_name: String,
    /// Admin capability, resolved at authentication time.
    pub admin: bool,
}

/// Kind of signaling envelope being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// SDP offer.
    Offer,
    /// SDP answer.
    Answer,
    /// ICE candidate.
    Candidate,
}

impl SignalKind {
    /// Stable wire name for logging and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

/// An opaque signaling envelope in flight between two peers (or a peer
/// and its room). Never persisted, never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingEnvelope {
    /// Envelope kind.
    pub kind: SignalKind,
    /// Connection that sent the envelope.
    pub sender: ConnectionId,
    /// Explicit target, if any. `None` means room broadcast for offers
    /// and candidates; answers always resolve to a single target.
    pub target: Option<ConnectionId>,
    /// Opaque payload, forwarded untouched.
    pub payload: serde_json::Value,
}

/// Target of an admin broadcast: every connection, or one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BroadcastScope {
    /// Every connection on every instance.
    All,
    /// Every connection bound to one identity.
    Identity(String),
}

impl From<String> for BroadcastScope {
    fn from(value: String) -> Self {
        if value == "all" {
            BroadcastScope::All
        } else {
            BroadcastScope::Identity(value)
        }
    }
}

impl From<BroadcastScope> for String {
    fn from(value: BroadcastScope) -> Self {
        match value {
            BroadcastScope::All => "all".to_string(),
            BroadcastScope::Identity(identity) => identity,
        }
    }
}

/// Events a transport adapter feeds into the session coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind an identity to the connection, verified by the credential store.
    Authenticate {
        /// Identity requesting the bind.
        identity: String,
        /// Pre-validated credential proof, passed through to the store.
        proof: String,
    },
    /// Reserve (or generate) a room id to join.
    CreateRoom {
        /// Caller-supplied room id; a fresh one is generated when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
    /// Join a room, implicitly leaving the previous one.
    Join {
        /// Room to join; materialized on first join.
        room_id: String,
        /// Display name shown to other members.
        display_name: String,
    },
    /// Relay an SDP offer.
    Offer {
        /// Opaque payload.
        payload: serde_json::Value,
        /// Explicit target; absent means broadcast to the room.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConnectionId>,
    },
    /// Relay an SDP answer.
    Answer {
        /// Opaque payload.
        payload: serde_json::Value,
        /// Explicit target; answers without one are dropped by the relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConnectionId>,
    },
    /// Relay an ICE candidate.
    Candidate {
        /// Opaque payload.
        payload: serde_json::Value,
        /// Explicit target; absent means broadcast to the room.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConnectionId>,
    },
    /// Room chat message.
    Message {
        /// Message text.
        text: String,
    },
    /// Direct message to one identity, in or out of a room.
    PrivateMessage {
        /// Target identity.
        to: String,
        /// Message text.
        text: String,
    },
    /// Mark a stored message as read.
    MessageRead {
        /// Id of the message to mark.
        message_id: Uuid,
    },
    /// Admin: remove a connection from its room.
    AdminKick {
        /// Connection to remove.
        target: ConnectionId,
    },
    /// Admin: ban an identity, effective at its next authentication.
    AdminBan {
        /// Identity to ban.
        identity: String,
        /// Reason recorded with the ban.
        reason: String,
    },
    /// Admin: message every connection or one identity.
    AdminBroadcast {
        /// `"all"` or a single identity.
        target: BroadcastScope,
        /// Message text.
        text: String,
    },
    /// Admin: list identities currently in rooms, across all rooms.
    GetAllUsers,
    /// Explicit disconnect; also synthesized by transports on drop.
    Disconnect,
}

/// Events the coordinator emits toward connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Identity bind succeeded.
    Authenticated {
        /// Bound identity.
        identity: String,
        /// Admin capability resolved from the credential store.
        admin: bool,
    },
    /// Reply to `create_room` carrying the usable room id.
    RoomCreated {
        /// Echoed or generated room id.
        room_id: String,
    },
    /// Roster snapshot sent to a new joiner, excluding the joiner.
    RoomUsers {
        /// Room the snapshot describes.
        room_id: String,
        /// Current members, joiner excluded.
        users: Vec<Member>,
    },
    /// A new member joined; sent to existing members.
    UserJoined {
        /// Room that gained a member.
        room_id: String,
        /// The new member.
        user: Member,
    },
    /// A member was removed (explicit leave, room switch, or kick).
    UserLeft {
        /// Room that lost a member.
        room_id: String,
        /// Connection that left.
        connection_id: ConnectionId,
        /// Display name the member had.
        display_name: String,
    },
    /// A member's transport disconnected.
    UserExit {
        /// Room that lost a member.
        room_id: String,
        /// Connection that disappeared.
        connection_id: ConnectionId,
    },
    /// Relayed SDP offer.
    Offer {
        /// Sending connection.
        from: ConnectionId,
        /// Opaque payload, untouched.
        payload: serde_json::Value,
    },
    /// Relayed SDP answer.
    Answer {
        /// Sending connection.
        from: ConnectionId,
        /// Opaque payload, untouched.
        payload: serde_json::Value,
    },
    /// Relayed ICE candidate.
    Candidate {
        /// Sending connection.
        from: ConnectionId,
        /// Opaque payload, untouched.
        payload: serde_json::Value,
    },
    /// Room chat message, delivered to all members including the sender.
    Message {
        /// Stored message id.
        id: Uuid,
        /// Room the message was sent in.
        room_id: String,
        /// Sender identity.
        from: String,
        /// Message text.
        text: String,
        /// Send timestamp.
        sent_at: DateTime<Utc>,
    },
    /// Direct message between identities.
    PrivateMessage {
        /// Stored message id.
        id: Uuid,
        /// Sender identity.
        from: String,
        /// Target identity.
        to: String,
        /// Message text.
        text: String,
        /// Send timestamp.
        sent_at: DateTime<Utc>,
    },
    /// Sent to a connection that was kicked from its room.
    Kicked {
        /// Room the connection was removed from.
        room_id: String,
    },
    /// Informational notice to a banned identity's live connections.
    UserBanned {
        /// Banned identity.
        identity: String,
        /// Ban reason.
        reason: String,
    },
    /// Admin answer to `get_all_users`.
    AllUsers {
        /// Identities currently in rooms.
        users: Vec<String>,
    },
    /// Non-fatal error surface.
    Error {
        /// Stable snake_case code.
        code: String,
        /// Client-safe description.
        reason: String,
    },
}

impl ServerEvent {
    /// Build the relayed form of an envelope, annotated with its sender.
    pub fn from_envelope(envelope: &SignalingEnvelope) -> Self {
        match envelope.kind {
            SignalKind::Offer => ServerEvent::Offer {
                from: envelope.sender,
                payload: envelope.payload.clone(),
            },
            SignalKind::Answer => ServerEvent::Answer {
                from: envelope.sender,
                payload: envelope.payload.clone(),
            },
            SignalKind::Candidate => ServerEvent::Candidate {
                from: envelope.sender,
                payload: envelope.payload.clone(),
            },
        }
    }
}
