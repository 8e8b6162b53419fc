//! Session Coordinator - per-connection event dispatch.
//!
//! The coordinator is the single entry point a transport adapter talks
//! to: it registers connections, dispatches [`ClientEvent`]s against the
//! connection's session state, and tears sessions down. Precondition
//! failures (unauthenticated, not in a room) come back to the offending
//! connection as `error` events; silent failures (moderation probes) are
//! dropped per the error taxonomy.
//!
//! The coordinator itself holds no per-connection locks: session state
//! lives in the registry, room state in the room actors, and delivery
//! state in the fanout.

use crate::errors::CoreError;
use crate::events::{ClientEvent, Member, ServerEvent, SignalKind, SignalingEnvelope};
use crate::fanout::{EventSink, PresenceFanout};
use crate::moderation::{wire_error, ModerationEngine};
use crate::observability::CoordinatorMetrics;
use crate::registry::{ConnectionRegistry, IdentityBinding};
use crate::rooms::{LeaveReason, RoomDirectory};
use crate::stores::{CredentialStore, PersistenceStore, StoredMessage, Verification};

use common::types::ConnectionId;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Session Coordinator.
pub struct SessionCoordinator {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    fanout: Arc<PresenceFanout>,
    moderation: ModerationEngine,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<dyn PersistenceStore>,
    metrics: Arc<CoordinatorMetrics>,
}

impl SessionCoordinator {
    /// Assemble the coordinator from its shared parts.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<RoomDirectory>,
        fanout: Arc<PresenceFanout>,
        credentials: Arc<dyn CredentialStore>,
        store: Arc<dyn PersistenceStore>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Arc<Self> {
        let moderation = ModerationEngine::new(
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&fanout),
            Arc::clone(&store),
            Arc::clone(&metrics),
        );
        Arc::new(Self {
            registry,
            directory,
            fanout,
            moderation,
            credentials,
            store,
            metrics,
        })
    }

    /// Admit a new transport connection.
    ///
    /// The sink receives every [`ServerEvent`] addressed to the
    /// connection until [`disconnect`] runs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] when the instance is at
    /// its connection cap.
    ///
    /// [`disconnect`]: SessionCoordinator::disconnect
    pub fn connect(&self, sink: EventSink) -> Result<ConnectionId, CoreError> {
        let connection_id = self.registry.register()?;
        self.fanout.register_sink(connection_id, sink);
        self.metrics.connection_opened();
        info!(
            target: "rc.coordinator",
            connection_id = %connection_id,
            "Connection admitted"
        );
        Ok(connection_id)
    }

    /// Tear a connection down: membership, fanout state, and registry
    /// entry. Idempotent; transports synthesize this on socket drop and
    /// clients may also send an explicit `disconnect`.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(removed) = self.registry.unregister(connection_id) else {
            return;
        };

        if let Some(room_id) = removed.last_room {
            self.directory
                .leave(&room_id, connection_id, LeaveReason::Disconnect)
                .await;
        }

        self.fanout.remove_connection(connection_id);
        self.metrics.connection_closed();
        info!(
            target: "rc.coordinator",
            connection_id = %connection_id,
            "Connection closed"
        );
    }

    /// Dispatch one inbound event for a connection.
    #[instrument(skip_all, name = "rc.coordinator.event", fields(connection_id = %connection_id))]
    pub async fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) {
        let result = match event {
            ClientEvent::Authenticate { identity, proof } => {
                self.authenticate(connection_id, identity, &proof).await
            }
            ClientEvent::CreateRoom { room_id } => self.create_room(connection_id, room_id),
            ClientEvent::Join {
                room_id,
                display_name,
            } => self.join(connection_id, room_id, display_name).await,
            ClientEvent::Offer { payload, target } => {
                self.relay(connection_id, SignalKind::Offer, payload, target)
                    .await
            }
            ClientEvent::Answer { payload, target } => {
                self.relay(connection_id, SignalKind::Answer, payload, target)
                    .await
            }
            ClientEvent::Candidate { payload, target } => {
                self.relay(connection_id, SignalKind::Candidate, payload, target)
                    .await
            }
            ClientEvent::Message { text } => self.room_message(connection_id, text).await,
            ClientEvent::PrivateMessage { to, text } => {
                self.private_message(connection_id, to, text).await
            }
            ClientEvent::MessageRead { message_id } => {
                self.mark_read(message_id);
                Ok(())
            }
            ClientEvent::AdminKick { target } => {
                self.moderation.kick(connection_id, target).await;
                Ok(())
            }
            ClientEvent::AdminBan { identity, reason } => {
                self.moderation.ban(connection_id, identity, reason).await;
                Ok(())
            }
            ClientEvent::AdminBroadcast { target, text } => {
                self.moderation.broadcast(connection_id, target, text).await;
                Ok(())
            }
            ClientEvent::GetAllUsers => {
                let users = self.moderation.list_all_users(connection_id);
                self.fanout
                    .publish_direct(connection_id, &ServerEvent::AllUsers { users });
                Ok(())
            }
            ClientEvent::Disconnect => {
                self.disconnect(connection_id).await;
                Ok(())
            }
        };

        if let Err(error) = result {
            self.notify_error(connection_id, &error);
        }
    }

    async fn authenticate(
        &self,
        connection_id: ConnectionId,
        identity: String,
        proof: &str,
    ) -> Result<(), CoreError> {
        let verification = self
            .credentials
            .verify(&identity, proof)
            .await
            .map_err(CoreError::from)?;

        let Verification::Verified { admin } = verification else {
            debug!(
                target: "rc.coordinator",
                connection_id = %connection_id,
                "Credential proof rejected"
            );
            self.fanout.publish_direct(
                connection_id,
                &ServerEvent::Error {
                    code: "unauthenticated".to_string(),
                    reason: "Authentication failed".to_string(),
                },
            );
            return Ok(());
        };

        // Banned identities fail exactly like bad credentials, so a
        // banned client cannot confirm the ban by probing
        if self
            .credentials
            .is_banned(&identity)
            .await
            .map_err(CoreError::from)?
        {
            info!(
                target: "rc.coordinator",
                connection_id = %connection_id,
                "Banned identity refused at authentication"
            );
            self.fanout.publish_direct(
                connection_id,
                &ServerEvent::Error {
                    code: "unauthenticated".to_string(),
                    reason: "Authentication failed".to_string(),
                },
            );
            return Ok(());
        }

        self.registry
            .bind_identity(connection_id, &identity, admin)?;
        self.fanout.bind_identity(connection_id, &identity);

        self.fanout.publish_direct(
            connection_id,
            &ServerEvent::Authenticated {
                identity: identity.clone(),
                admin,
            },
        );
        info!(
            target: "rc.coordinator",
            connection_id = %connection_id,
            admin,
            "Connection authenticated"
        );
        Ok(())
    }

    fn create_room(
        &self,
        connection_id: ConnectionId,
        room_id: Option<String>,
    ) -> Result<(), CoreError> {
        self.require_binding(connection_id)?;

        let room_id = self.directory.ensure_room(room_id);
        self.fanout
            .publish_direct(connection_id, &ServerEvent::RoomCreated { room_id });
        Ok(())
    }

    async fn join(
        &self,
        connection_id: ConnectionId,
        room_id: String,
        display_name: String,
    ) -> Result<(), CoreError> {
        let binding = self.require_binding(connection_id)?;

        // One room per connection: switching rooms leaves the old one
        // first, with an explicit user_left to its remaining members
        if let Some(previous) = self.registry.current_room(connection_id) {
            if previous != room_id {
                self.directory
                    .leave(&previous, connection_id, LeaveReason::Explicit)
                    .await;
                self.registry.set_current_room(connection_id, None);
            }
        }

        let member = Member {
            connection_id,
            display_name,
            admin: binding.admin,
        };
        let users = self.directory.join(&room_id, member).await?;
        self.registry
            .set_current_room(connection_id, Some(room_id.clone()));

        // Roster snapshot so the joiner can start signaling immediately
        self.fanout
            .publish_direct(connection_id, &ServerEvent::RoomUsers { room_id, users });
        Ok(())
    }

    async fn relay(
        &self,
        connection_id: ConnectionId,
        kind: SignalKind,
        payload: serde_json::Value,
        target: Option<ConnectionId>,
    ) -> Result<(), CoreError> {
        let room_id = self.require_room(connection_id)?;

        let envelope = SignalingEnvelope {
            kind,
            sender: connection_id,
            target,
            payload,
        };
        self.directory.relay(&room_id, envelope).await
    }

    async fn room_message(
        &self,
        connection_id: ConnectionId,
        text: String,
    ) -> Result<(), CoreError> {
        let binding = self.require_binding(connection_id)?;
        let room_id = self.require_room(connection_id)?;

        let message = StoredMessage::new(binding.identity.clone(), None, text.clone());
        let event = ServerEvent::Message {
            id: message.id,
            room_id: room_id.clone(),
            from: binding.identity,
            text,
            sent_at: message.sent_at,
        };
        self.moderation.persist_message(message);

        // Through the room actor, ordered with roster changes; the
        // sender gets its own message back as the delivery receipt
        self.directory.broadcast(&room_id, event, None).await;
        Ok(())
    }

    async fn private_message(
        &self,
        connection_id: ConnectionId,
        to: String,
        text: String,
    ) -> Result<(), CoreError> {
        let binding = self.require_binding(connection_id)?;

        let message = StoredMessage::new(binding.identity.clone(), Some(to.clone()), text.clone());
        let event = ServerEvent::PrivateMessage {
            id: message.id,
            from: binding.identity,
            to: to.clone(),
            text,
            sent_at: message.sent_at,
        };
        self.moderation.persist_message(message);

        // Reaches every connection the target identity holds, on every
        // instance; delivery to zero connections is not an error
        self.fanout.publish_identity(&to, &event).await;
        Ok(())
    }

    /// Flip a message's read flag without blocking the event loop.
    /// Unknown ids are logged, not surfaced: the sender may never have
    /// been persisted if the store was down at send time.
    fn mark_read(&self, message_id: Uuid) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match store.mark_read(message_id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        target: "rc.coordinator",
                        message_id = %message_id,
                        "Read mark for unknown message"
                    );
                }
                Err(e) => {
                    metrics.store_write_failed("mark_read");
                    warn!(
                        target: "rc.coordinator",
                        error = %e,
                        message_id = %message_id,
                        "Read mark failed"
                    );
                }
            }
        });
    }

    fn require_binding(&self, connection_id: ConnectionId) -> Result<IdentityBinding, CoreError> {
        self.registry
            .binding(connection_id)
            .ok_or(CoreError::Unauthenticated)
    }

    fn require_room(&self, connection_id: ConnectionId) -> Result<String, CoreError> {
        self.registry
            .current_room(connection_id)
            .ok_or(CoreError::NotInRoom)
    }

    fn notify_error(&self, connection_id: ConnectionId, error: &CoreError) {
        warn!(
            target: "rc.coordinator",
            connection_id = %connection_id,
            error = %error,
            "Event handling failed"
        );
        if let Some(event) = wire_error(error) {
            self.fanout.publish_direct(connection_id, &event);
        }
    }
}
