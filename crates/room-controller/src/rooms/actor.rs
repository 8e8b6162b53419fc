//! Per-room actor owning one room's membership.
//!
//! Each live room runs one actor task with a bounded mailbox. Handlers
//! run one at a time, so two joins racing a "room became empty, delete
//! it" can never interleave: either the join lands first and the room
//! stays, or the actor has already announced its retirement and the
//! directory retries the join against a fresh actor.
//!
//! The actor publishes all room-scoped events itself (roster changes,
//! chat, relayed broadcasts), which pins event order within a room to
//! mailbox arrival order.

use crate::errors::CoreError;
use crate::events::{Member, ServerEvent, SignalingEnvelope};
use crate::fanout::PresenceFanout;
use crate::observability::CoordinatorMetrics;
use crate::relay::{self, RelayDecision};

use chrono::{DateTime, Utc};
use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Why a member is being removed. Explicit removals emit `user_left`;
/// transport disconnects emit `user_exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Explicit leave or a switch to another room.
    Explicit,
    /// Transport-level disconnect.
    Disconnect,
}

/// Notification the actor sends its directory just before retiring.
#[derive(Debug)]
pub(super) struct RoomClosed {
    pub room_id: String,
    pub epoch: u64,
}

/// Messages handled by a room actor.
enum RoomMessage {
    Join {
        member: Member,
        respond_to: oneshot::Sender<Vec<Member>>,
    },
    Leave {
        connection_id: ConnectionId,
        reason: LeaveReason,
        respond_to: oneshot::Sender<Option<Member>>,
    },
    Members {
        respond_to: oneshot::Sender<Vec<Member>>,
    },
    Kick {
        actor: ConnectionId,
        target: ConnectionId,
        respond_to: oneshot::Sender<Option<Member>>,
    },
    Relay {
        envelope: SignalingEnvelope,
        respond_to: oneshot::Sender<Result<(), CoreError>>,
    },
    Broadcast {
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    },
}

/// Handle to one room's actor.
///
/// A send failure means the actor has retired (room emptied) or is
/// shutting down; callers surface that as [`CoreError::RoomNotFound`]
/// so the directory can retry against a fresh actor.
#[derive(Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    room_id: String,
    epoch: u64,
}

impl RoomHandle {
    /// The room this handle addresses.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Spawn epoch, used by the directory to evict exactly this actor.
    #[must_use]
    pub(super) fn epoch(&self) -> u64 {
        self.epoch
    }

    fn gone(&self) -> CoreError {
        CoreError::RoomNotFound(self.room_id.clone())
    }

    /// Add a member, returning the prior roster (joiner excluded).
    /// Rejoining refreshes the member entry without duplicating it.
    pub async fn join(&self, member: Member) -> Result<Vec<Member>, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                member,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Remove a member, returning it for downstream notification.
    pub async fn leave(
        &self,
        connection_id: ConnectionId,
        reason: LeaveReason,
    ) -> Result<Option<Member>, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                connection_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Current roster snapshot.
    pub async fn members(&self) -> Result<Vec<Member>, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Members { respond_to: tx })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Admin-gated removal of another member. Returns the removed member
    /// on success, `None` when the action was (silently) refused.
    pub async fn kick(
        &self,
        actor: ConnectionId,
        target: ConnectionId,
    ) -> Result<Option<Member>, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Kick {
                actor,
                target,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Route a signaling envelope against current membership.
    pub async fn relay(&self, envelope: SignalingEnvelope) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Relay {
                envelope,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Publish a room-scoped event through the actor, preserving its
    /// ordering relative to membership changes.
    pub async fn broadcast(
        &self,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> Result<(), CoreError> {
        self.sender
            .send(RoomMessage::Broadcast { event, exclude })
            .await
            .map_err(|_| self.gone())
    }
}

/// The room actor implementation.
pub(super) struct RoomActor {
    room_id: String,
    epoch: u64,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// Ordered membership; at most one entry per connection id.
    members: Vec<Member>,
    /// Set once the first member arrives; gates retire-on-empty so a
    /// freshly spawned actor does not close before its first join.
    ever_joined: bool,
    created_at: DateTime<Utc>,
    fanout: Arc<PresenceFanout>,
    metrics: Arc<CoordinatorMetrics>,
    closed_tx: mpsc::UnboundedSender<RoomClosed>,
}

impl RoomActor {
    /// Spawn a room actor, returning its handle and task handle.
    pub(super) fn spawn(
        room_id: String,
        epoch: u64,
        mailbox_capacity: usize,
        fanout: Arc<PresenceFanout>,
        metrics: Arc<CoordinatorMetrics>,
        cancel_token: CancellationToken,
        closed_tx: mpsc::UnboundedSender<RoomClosed>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(mailbox_capacity);

        let actor = Self {
            room_id: room_id.clone(),
            epoch,
            receiver,
            cancel_token,
            members: Vec::new(),
            ever_joined: false,
            created_at: Utc::now(),
            fanout,
            metrics,
            closed_tx,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            RoomHandle {
                sender,
                room_id,
                epoch,
            },
            task_handle,
        )
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.rooms.actor", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        debug!(
            target: "rc.rooms",
            room_id = %self.room_id,
            created_at = %self.created_at,
            "Room actor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.rooms",
                        room_id = %self.room_id,
                        members = self.members.len(),
                        "Room actor cancelled"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            if self.ever_joined && self.members.is_empty() {
                                self.retire();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        debug!(target: "rc.rooms", room_id = %self.room_id, "Room actor stopped");
    }

    /// Announce retirement to the directory. Joins still in the mailbox
    /// observe a dropped reply channel and retry through the directory.
    fn retire(&self) {
        debug!(target: "rc.rooms", room_id = %self.room_id, "Room emptied, retiring");
        let _ = self.closed_tx.send(RoomClosed {
            room_id: self.room_id.clone(),
            epoch: self.epoch,
        });
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join { member, respond_to } => {
                let others = self.handle_join(member).await;
                let _ = respond_to.send(others);
            }
            RoomMessage::Leave {
                connection_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_leave(connection_id, reason).await;
                let _ = respond_to.send(removed);
            }
            RoomMessage::Members { respond_to } => {
                let _ = respond_to.send(self.members.clone());
            }
            RoomMessage::Kick {
                actor,
                target,
                respond_to,
            } => {
                let removed = self.handle_kick(actor, target).await;
                let _ = respond_to.send(removed);
            }
            RoomMessage::Relay {
                envelope,
                respond_to,
            } => {
                let result = self.handle_relay(envelope).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Broadcast { event, exclude } => {
                self.fanout.publish_room(&self.room_id, &event, exclude).await;
            }
        }
    }

    async fn handle_join(&mut self, member: Member) -> Vec<Member> {
        // Rejoin refreshes in place, never duplicates
        let rejoin = if let Some(existing) = self
            .members
            .iter_mut()
            .find(|m| m.connection_id == member.connection_id)
        {
            *existing = member.clone();
            true
        } else {
            self.members.push(member.clone());
            false
        };

        self.ever_joined = true;
        self.fanout
            .subscribe_room(&self.room_id, member.connection_id);

        let others: Vec<Member> = self
            .members
            .iter()
            .filter(|m| m.connection_id != member.connection_id)
            .cloned()
            .collect();

        if !rejoin {
            self.fanout
                .publish_room(
                    &self.room_id,
                    &ServerEvent::UserJoined {
                        room_id: self.room_id.clone(),
                        user: member.clone(),
                    },
                    Some(member.connection_id),
                )
                .await;

            info!(
                target: "rc.rooms",
                room_id = %self.room_id,
                connection_id = %member.connection_id,
                members = self.members.len(),
                "Member joined"
            );
        }

        others
    }

    async fn handle_leave(
        &mut self,
        connection_id: ConnectionId,
        reason: LeaveReason,
    ) -> Option<Member> {
        let index = self
            .members
            .iter()
            .position(|m| m.connection_id == connection_id)?;
        let member = self.members.remove(index);

        self.fanout.unsubscribe_room(&self.room_id, connection_id);

        let event = match reason {
            LeaveReason::Explicit => ServerEvent::UserLeft {
                room_id: self.room_id.clone(),
                connection_id,
                display_name: member.display_name.clone(),
            },
            LeaveReason::Disconnect => ServerEvent::UserExit {
                room_id: self.room_id.clone(),
                connection_id,
            },
        };
        self.fanout.publish_room(&self.room_id, &event, None).await;

        info!(
            target: "rc.rooms",
            room_id = %self.room_id,
            connection_id = %connection_id,
            reason = ?reason,
            remaining = self.members.len(),
            "Member removed"
        );

        Some(member)
    }

    /// Kick is refused without feedback unless the actor is an admin
    /// member and the target is a member of this room.
    async fn handle_kick(
        &mut self,
        actor: ConnectionId,
        target: ConnectionId,
    ) -> Option<Member> {
        let actor_is_admin = self
            .members
            .iter()
            .any(|m| m.connection_id == actor && m.admin);
        if !actor_is_admin || actor == target {
            debug!(
                target: "rc.rooms",
                room_id = %self.room_id,
                actor = %actor,
                "Kick refused"
            );
            return None;
        }

        self.handle_leave(target, LeaveReason::Explicit).await
    }

    async fn handle_relay(&mut self, envelope: SignalingEnvelope) -> Result<(), CoreError> {
        let decision = relay::route(&self.members, &envelope)?;
        self.metrics.envelope_relayed(envelope.kind.as_str());

        let event = ServerEvent::from_envelope(&envelope);
        match decision {
            RelayDecision::Broadcast { .. } => {
                // Local membership equals the fanout's room subscription
                // set; the mirror covers members on sibling instances.
                self.fanout
                    .publish_room(&self.room_id, &event, Some(envelope.sender))
                    .await;
            }
            RelayDecision::Direct { recipient } => {
                self.fanout.publish_direct(recipient, &event);
            }
        }
        Ok(())
    }
}
