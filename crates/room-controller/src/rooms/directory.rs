//! Room directory - supervises room actors and owns room lifecycle.
//!
//! Rooms materialize on first join and retire when their membership
//! reaches zero, so a zero-member room is never observable. The
//! directory resolves the "empty room retiring" vs "new member joining"
//! race by retrying a join whose target actor retired underneath it;
//! the spawn epoch guards against evicting a replacement actor that
//! reused the same room id.

use super::actor::{LeaveReason, RoomActor, RoomClosed, RoomHandle};
use crate::errors::CoreError;
use crate::events::{Member, ServerEvent, SignalingEnvelope};
use crate::fanout::PresenceFanout;
use crate::observability::CoordinatorMetrics;

use common::types::ConnectionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts before a join gives up on racing retiring actors. Each
/// retry spawns a fresh actor, so one retry suffices in practice.
const JOIN_RETRY_LIMIT: usize = 3;

/// A supervised room actor.
struct ManagedRoom {
    handle: RoomHandle,
    task_handle: JoinHandle<()>,
}

type RoomTable = Arc<Mutex<HashMap<String, ManagedRoom>>>;

/// Room directory.
pub struct RoomDirectory {
    rooms: RoomTable,
    fanout: Arc<PresenceFanout>,
    metrics: Arc<CoordinatorMetrics>,
    mailbox_capacity: usize,
    cancel_token: CancellationToken,
    next_epoch: AtomicU64,
    closed_tx: mpsc::UnboundedSender<RoomClosed>,
}

impl RoomDirectory {
    /// Create a directory. Spawns the reaper task that evicts retired
    /// room actors; the task stops when the cancel token fires.
    #[must_use]
    pub fn new(
        fanout: Arc<PresenceFanout>,
        metrics: Arc<CoordinatorMetrics>,
        mailbox_capacity: usize,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        let rooms: RoomTable = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::reap_closed(
            Arc::clone(&rooms),
            Arc::clone(&metrics),
            closed_rx,
            cancel_token.clone(),
        ));

        Arc::new(Self {
            rooms,
            fanout,
            metrics,
            mailbox_capacity,
            cancel_token,
            next_epoch: AtomicU64::new(0),
            closed_tx,
        })
    }

    /// Evict retired actors from the table, epoch-guarded so a
    /// replacement actor under the same room id survives.
    async fn reap_closed(
        rooms: RoomTable,
        metrics: Arc<CoordinatorMetrics>,
        mut closed_rx: mpsc::UnboundedReceiver<RoomClosed>,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                closed = closed_rx.recv() => {
                    let Some(closed) = closed else { break };
                    let removed = {
                        let mut table = lock_rooms(&rooms);
                        match table.get(&closed.room_id) {
                            Some(managed) if managed.handle.epoch() == closed.epoch => {
                                table.remove(&closed.room_id).is_some()
                            }
                            _ => false,
                        }
                    };
                    if removed {
                        metrics.room_closed();
                        debug!(
                            target: "rc.rooms",
                            room_id = %closed.room_id,
                            "Empty room deleted"
                        );
                    }
                }
            }
        }
    }

    /// Echo a caller-supplied room id or generate a fresh one. Room
    /// state materializes on first join, so this never fails and never
    /// leaves an observable empty room.
    #[must_use]
    pub fn ensure_room(&self, room_id: Option<String>) -> String {
        room_id.unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Add a member to a room, materializing the room if needed.
    /// Returns the roster the joiner found (joiner excluded).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] only if every retry lost the race
    /// against a retiring actor, which a working reaper makes unreachable.
    pub async fn join(&self, room_id: &str, member: Member) -> Result<Vec<Member>, CoreError> {
        for _ in 0..JOIN_RETRY_LIMIT {
            let handle = self.get_or_spawn(room_id);
            match handle.join(member.clone()).await {
                Ok(others) => return Ok(others),
                Err(CoreError::RoomNotFound(_)) => {
                    // The actor retired between lookup and send; evict it
                    // (epoch-guarded) and retry against a fresh spawn
                    self.evict(room_id, handle.epoch());
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        warn!(target: "rc.rooms", room_id, "Join retry limit exhausted");
        Err(CoreError::Internal(format!(
            "join kept racing room retirement in {room_id}"
        )))
    }

    /// Remove a member. Returns the removed member, or `None` if the
    /// room or membership does not exist (idempotent teardown).
    pub async fn leave(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        reason: LeaveReason,
    ) -> Option<Member> {
        let handle = self.lookup(room_id)?;
        handle.leave(connection_id, reason).await.ok().flatten()
    }

    /// Roster snapshot; empty for an unknown room.
    pub async fn members(&self, room_id: &str) -> Vec<Member> {
        match self.lookup(room_id) {
            Some(handle) => handle.members().await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Whether a connection is an admin member of a room.
    pub async fn is_admin(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        self.members(room_id)
            .await
            .iter()
            .any(|m| m.connection_id == connection_id && m.admin)
    }

    /// Admin-gated kick, serialized with the room's other mutations.
    /// `None` means silently refused (not admin, wrong room, no target).
    pub async fn kick(
        &self,
        room_id: &str,
        actor: ConnectionId,
        target: ConnectionId,
    ) -> Option<Member> {
        let handle = self.lookup(room_id)?;
        handle.kick(actor, target).await.ok().flatten()
    }

    /// Route a signaling envelope within a room.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotInRoom`] if the room is gone (the sender's
    /// membership evaporated), or the relay policy errors.
    pub async fn relay(&self, room_id: &str, envelope: SignalingEnvelope) -> Result<(), CoreError> {
        let handle = self.lookup(room_id).ok_or(CoreError::NotInRoom)?;
        match handle.relay(envelope).await {
            Err(CoreError::RoomNotFound(_)) => Err(CoreError::NotInRoom),
            other => other,
        }
    }

    /// Publish a room-scoped event in mailbox order. Dropped silently if
    /// the room is gone.
    pub async fn broadcast(
        &self,
        room_id: &str,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) {
        if let Some(handle) = self.lookup(room_id) {
            let _ = handle.broadcast(event, exclude).await;
        }
    }

    /// Number of live rooms on this instance.
    #[must_use]
    pub fn room_count(&self) -> usize {
        lock_rooms(&self.rooms).len()
    }

    /// Drain all room actors, waiting up to `timeout` for each.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel_token.cancel();

        let drained: Vec<(String, ManagedRoom)> =
            lock_rooms(&self.rooms).drain().collect();

        info!(
            target: "rc.rooms",
            rooms = drained.len(),
            "Draining room actors"
        );

        for (room_id, managed) in drained {
            match tokio::time::timeout(timeout, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(target: "rc.rooms", room_id = %room_id, "Room actor drained");
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.rooms",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.rooms",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }
    }

    fn lookup(&self, room_id: &str) -> Option<RoomHandle> {
        lock_rooms(&self.rooms)
            .get(room_id)
            .map(|managed| managed.handle.clone())
    }

    fn get_or_spawn(&self, room_id: &str) -> RoomHandle {
        let mut table = lock_rooms(&self.rooms);
        if let Some(managed) = table.get(room_id) {
            return managed.handle.clone();
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let (handle, task_handle) = RoomActor::spawn(
            room_id.to_string(),
            epoch,
            self.mailbox_capacity,
            Arc::clone(&self.fanout),
            Arc::clone(&self.metrics),
            self.cancel_token.child_token(),
            self.closed_tx.clone(),
        );

        table.insert(
            room_id.to_string(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.room_opened();

        debug!(target: "rc.rooms", room_id, "Room materialized");
        handle
    }

    /// Remove a specific actor generation from the table.
    fn evict(&self, room_id: &str, epoch: u64) {
        let removed = {
            let mut table = lock_rooms(&self.rooms);
            match table.get(room_id) {
                Some(managed) if managed.handle.epoch() == epoch => {
                    table.remove(room_id).is_some()
                }
                _ => false,
            }
        };
        if removed {
            self.metrics.room_closed();
        }
    }
}

fn lock_rooms(rooms: &RoomTable) -> std::sync::MutexGuard<'_, HashMap<String, ManagedRoom>> {
    match rooms.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
