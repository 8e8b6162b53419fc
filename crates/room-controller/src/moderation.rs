//! Moderation Engine - admin-gated kick, ban, broadcast, and listing.
//!
//! Every operation re-checks the admin capability at execution time
//! from the actor's registry entry. Failed attempts are ignored without
//! feedback: a non-admin probing moderation operations learns nothing
//! from the wire.
//!
//! Bans are write-through: the record is persisted (fire-and-forget)
//! and enforced at the target's next authentication. Live connections
//! of a freshly banned identity get an informational notice but are not
//! torn down.

use crate::errors::CoreError;
use crate::events::{BroadcastScope, ServerEvent};
use crate::fanout::PresenceFanout;
use crate::observability::CoordinatorMetrics;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomDirectory;
use crate::stores::{BanRecord, PersistenceStore, StoredMessage};

use chrono::Utc;
use common::types::ConnectionId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Moderation Engine.
pub struct ModerationEngine {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    fanout: Arc<PresenceFanout>,
    store: Arc<dyn PersistenceStore>,
    metrics: Arc<CoordinatorMetrics>,
}

impl ModerationEngine {
    /// Wire up the engine against shared coordinator state.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<RoomDirectory>,
        fanout: Arc<PresenceFanout>,
        store: Arc<dyn PersistenceStore>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            registry,
            directory,
            fanout,
            store,
            metrics,
        }
    }

    /// Remove `target` from the room it shares with `actor`.
    ///
    /// Refused without feedback unless the actor is an admin in the same
    /// room as the target. The room actor re-checks the actor's in-room
    /// admin membership, so a stale registry read cannot authorize a kick.
    pub async fn kick(&self, actor: ConnectionId, target: ConnectionId) {
        if !self.registry.is_admin(actor) {
            debug!(target: "rc.moderation", actor = %actor, "Kick refused: not admin");
            return;
        }

        let Some(room_id) = self.registry.current_room(actor) else {
            debug!(target: "rc.moderation", actor = %actor, "Kick refused: actor not in a room");
            return;
        };
        if self.registry.current_room(target).as_deref() != Some(room_id.as_str()) {
            debug!(
                target: "rc.moderation",
                actor = %actor,
                kick_target = %target,
                "Kick refused: target not in actor's room"
            );
            return;
        }

        let Some(removed) = self.directory.kick(&room_id, actor, target).await else {
            return;
        };

        self.registry.set_current_room(target, None);
        self.fanout.publish_direct(
            target,
            &ServerEvent::Kicked {
                room_id: room_id.clone(),
            },
        );

        info!(
            target: "rc.moderation",
            room_id = %room_id,
            actor = %actor,
            kicked = %removed.connection_id,
            "Member kicked"
        );
    }

    /// Ban an identity. The ban takes effect at the identity's next
    /// authentication; live connections only receive a notice.
    pub async fn ban(&self, actor: ConnectionId, identity: String, reason: String) {
        let Some(binding) = self.registry.binding(actor) else {
            debug!(target: "rc.moderation", actor = %actor, "Ban refused: unauthenticated");
            return;
        };
        if !binding.admin {
            debug!(target: "rc.moderation", actor = %actor, "Ban refused: not admin");
            return;
        }

        let record = BanRecord {
            identity: identity.clone(),
            reason: reason.clone(),
            banned_by: binding.identity,
            banned_at: Utc::now(),
        };
        self.persist_ban(record);

        self.fanout
            .publish_identity(&identity, &ServerEvent::UserBanned { identity: identity.clone(), reason })
            .await;

        info!(target: "rc.moderation", identity = %identity, "Identity banned");
    }

    /// Message every connection, or every connection of one identity.
    /// Refused without feedback for non-admins.
    pub async fn broadcast(&self, actor: ConnectionId, scope: BroadcastScope, text: String) {
        let Some(binding) = self.registry.binding(actor) else {
            debug!(target: "rc.moderation", actor = %actor, "Broadcast refused: unauthenticated");
            return;
        };
        if !binding.admin {
            debug!(target: "rc.moderation", actor = %actor, "Broadcast refused: not admin");
            return;
        }

        let to: String = scope.clone().into();
        let message = StoredMessage::new(binding.identity.clone(), Some(to.clone()), text.clone());
        let event = ServerEvent::PrivateMessage {
            id: message.id,
            from: binding.identity,
            to,
            text,
            sent_at: message.sent_at,
        };
        self.persist_message(message);

        match scope {
            BroadcastScope::All => self.fanout.publish_all(&event).await,
            BroadcastScope::Identity(identity) => {
                self.fanout.publish_identity(&identity, &event).await;
            }
        }
    }

    /// Identities currently in rooms, across all rooms and instances'
    /// local view. Non-admins get an empty list rather than an error.
    #[must_use]
    pub fn list_all_users(&self, actor: ConnectionId) -> Vec<String> {
        if !self.registry.is_admin(actor) {
            debug!(target: "rc.moderation", actor = %actor, "User listing refused: not admin");
            return Vec::new();
        }
        self.registry.identities_in_rooms()
    }

    /// Append a message record without blocking delivery.
    pub(crate) fn persist_message(&self, message: StoredMessage) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let id = message.id;
            if let Err(e) = store.append_message(message).await {
                metrics.store_write_failed("append_message");
                warn!(
                    target: "rc.moderation",
                    error = %e,
                    message_id = %id,
                    "Message persistence failed, delivery unaffected"
                );
            }
        });
    }

    /// Append a ban record without blocking the ban notice.
    fn persist_ban(&self, ban: BanRecord) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let identity = ban.identity.clone();
            if let Err(e) = store.record_ban(ban).await {
                metrics.store_write_failed("record_ban");
                warn!(
                    target: "rc.moderation",
                    error = %e,
                    identity = %identity,
                    "Ban persistence failed"
                );
            }
        });
    }
}

/// Map an error for the wire, dropping the ones that must stay silent.
pub(crate) fn wire_error(error: &CoreError) -> Option<ServerEvent> {
    if error.is_silent() {
        return None;
    }
    Some(ServerEvent::Error {
        code: error.error_code().to_string(),
        reason: error.client_message(),
    })
}
