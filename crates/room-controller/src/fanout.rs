//! Presence Fanout - event delivery to local sinks and sibling instances.
//!
//! The fanout owns the sink table (connection id to outbound channel),
//! per-room subscription sets, and the identity subscription index. Room
//! and identity scoped events are delivered to local subscribers and
//! mirrored through the backplane so sibling instances deliver to their
//! own local subscribers. Frames carry the origin instance id; an
//! instance ignores its own mirrored frames, so no connection sees an
//! event twice.
//!
//! Connection ids are process-local, so [`PresenceFanout::publish_direct`]
//! never crosses the backplane; cross-instance addressing is by identity.

use crate::backplane::{Backplane, DIRECT_CHANNEL, ROOMS_CHANNEL};
use crate::errors::CoreError;
use crate::events::ServerEvent;
use crate::observability::CoordinatorMetrics;
use common::types::ConnectionId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound channel a transport adapter registers per connection.
///
/// Unbounded: the transport applies its own backpressure and drops the
/// receiver on disconnect, at which point deliveries become no-ops.
pub type EventSink = mpsc::UnboundedSender<ServerEvent>;

/// A frame mirrored through the backplane.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackplaneFrame {
    /// Instance that produced the frame.
    origin: String,
    /// Delivery scope on the receiving instance.
    #[serde(flatten)]
    scope: FrameScope,
    /// The event to deliver.
    event: ServerEvent,
}

/// Delivery scope of a backplane frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
enum FrameScope {
    /// Local subscribers of one room.
    Room {
        /// Target room.
        room_id: String,
    },
    /// Local connections bound to one identity.
    Identity {
        /// Target identity.
        identity: String,
    },
    /// Every local connection.
    AllConnections,
}

#[derive(Default)]
struct FanoutInner {
    /// Outbound sink per local connection.
    sinks: HashMap<ConnectionId, EventSink>,
    /// Room id to subscribed local connections.
    rooms: HashMap<String, HashSet<ConnectionId>>,
    /// Reverse of `rooms`, for O(1) cleanup on disconnect.
    room_of: HashMap<ConnectionId, String>,
    /// Identity to bound local connections.
    identities: HashMap<String, HashSet<ConnectionId>>,
    /// Reverse of `identities`.
    identity_of: HashMap<ConnectionId, String>,
}

/// Presence Fanout.
pub struct PresenceFanout {
    instance_id: String,
    backplane: Arc<dyn Backplane>,
    metrics: Arc<CoordinatorMetrics>,
    inner: Mutex<FanoutInner>,
}

impl PresenceFanout {
    /// Create a fanout for one instance.
    #[must_use]
    pub fn new(
        instance_id: String,
        backplane: Arc<dyn Backplane>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance_id,
            backplane,
            metrics,
            inner: Mutex::new(FanoutInner::default()),
        })
    }

    /// Subscribe to the backplane and start delivering sibling frames to
    /// local subscribers. Returns once both subscriptions are live, so
    /// the caller can flip readiness afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Backplane`] if a subscription cannot be
    /// established.
    pub async fn start(self: &Arc<Self>, cancel_token: CancellationToken) -> Result<(), CoreError> {
        let rooms_rx = self.backplane.subscribe(ROOMS_CHANNEL).await?;
        let direct_rx = self.backplane.subscribe(DIRECT_CHANNEL).await?;

        for (channel, mut rx) in [(ROOMS_CHANNEL, rooms_rx), (DIRECT_CHANNEL, direct_rx)] {
            let fanout = Arc::clone(self);
            let token = cancel_token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        frame = rx.recv() => {
                            match frame {
                                Some(raw) => fanout.handle_frame(channel, &raw),
                                None => break,
                            }
                        }
                    }
                }
                debug!(target: "rc.fanout", channel, "Backplane pump stopped");
            });
        }

        info!(
            target: "rc.fanout",
            instance_id = %self.instance_id,
            "Backplane subscriptions established"
        );
        Ok(())
    }

    /// Deliver a sibling instance's frame to local subscribers.
    fn handle_frame(&self, channel: &'static str, raw: &str) {
        let frame: BackplaneFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    target: "rc.fanout",
                    error = %e,
                    channel,
                    "Dropping malformed backplane frame"
                );
                return;
            }
        };

        // Our own mirror; local delivery already happened
        if frame.origin == self.instance_id {
            return;
        }

        match frame.scope {
            FrameScope::Room { room_id } => {
                self.deliver_room_local(&room_id, &frame.event, None);
            }
            FrameScope::Identity { identity } => {
                self.deliver_identity_local(&identity, &frame.event);
            }
            FrameScope::AllConnections => self.deliver_all_local(&frame.event),
        }
    }

    /// Register the outbound sink for a new connection.
    pub fn register_sink(&self, connection_id: ConnectionId, sink: EventSink) {
        self.lock().sinks.insert(connection_id, sink);
    }

    /// Record the identity a connection is bound to.
    pub fn bind_identity(&self, connection_id: ConnectionId, identity: &str) {
        let mut inner = self.lock();
        if let Some(old) = inner.identity_of.insert(connection_id, identity.to_string()) {
            if old != identity {
                if let Some(set) = inner.identities.get_mut(&old) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        inner.identities.remove(&old);
                    }
                }
            }
        }
        inner
            .identities
            .entry(identity.to_string())
            .or_default()
            .insert(connection_id);
    }

    /// Subscribe a connection to a room's events. A connection subscribes
    /// to at most one room; any previous subscription is replaced.
    pub fn subscribe_room(&self, room_id: &str, connection_id: ConnectionId) {
        let mut inner = self.lock();
        if let Some(old) = inner.room_of.insert(connection_id, room_id.to_string()) {
            if old != room_id {
                if let Some(set) = inner.rooms.get_mut(&old) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        inner.rooms.remove(&old);
                    }
                }
            }
        }
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
    }

    /// Drop a connection's room subscription.
    pub fn unsubscribe_room(&self, room_id: &str, connection_id: ConnectionId) {
        let mut inner = self.lock();
        if inner.room_of.get(&connection_id).map(String::as_str) == Some(room_id) {
            inner.room_of.remove(&connection_id);
        }
        if let Some(set) = inner.rooms.get_mut(room_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }

    /// Remove all of a connection's fanout state on disconnect.
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        let mut inner = self.lock();
        inner.sinks.remove(&connection_id);

        if let Some(room_id) = inner.room_of.remove(&connection_id) {
            if let Some(set) = inner.rooms.get_mut(&room_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    inner.rooms.remove(&room_id);
                }
            }
        }

        if let Some(identity) = inner.identity_of.remove(&connection_id) {
            if let Some(set) = inner.identities.get_mut(&identity) {
                set.remove(&connection_id);
                if set.is_empty() {
                    inner.identities.remove(&identity);
                }
            }
        }
    }

    /// Deliver to every local subscriber of a room (minus the excluded
    /// sender, if any) and mirror to sibling instances.
    pub async fn publish_room(
        &self,
        room_id: &str,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) {
        self.deliver_room_local(room_id, event, exclude);
        self.mirror(
            ROOMS_CHANNEL,
            FrameScope::Room {
                room_id: room_id.to_string(),
            },
            event,
        )
        .await;
    }

    /// Deliver to one local connection. Never crosses the backplane.
    pub fn publish_direct(&self, connection_id: ConnectionId, event: &ServerEvent) {
        let sink = {
            let inner = self.lock();
            inner.sinks.get(&connection_id).cloned()
        };
        if let Some(sink) = sink {
            self.send(connection_id, &sink, event);
        }
    }

    /// Deliver to every connection bound to an identity, here and on
    /// sibling instances.
    pub async fn publish_identity(&self, identity: &str, event: &ServerEvent) {
        self.deliver_identity_local(identity, event);
        self.mirror(
            DIRECT_CHANNEL,
            FrameScope::Identity {
                identity: identity.to_string(),
            },
            event,
        )
        .await;
    }

    /// Deliver to every connection on every instance.
    pub async fn publish_all(&self, event: &ServerEvent) {
        self.deliver_all_local(event);
        self.mirror(DIRECT_CHANNEL, FrameScope::AllConnections, event)
            .await;
    }

    fn deliver_room_local(
        &self,
        room_id: &str,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) {
        let targets: Vec<(ConnectionId, EventSink)> = {
            let inner = self.lock();
            let Some(members) = inner.rooms.get(room_id) else {
                return;
            };
            members
                .iter()
                .filter(|id| Some(**id) != exclude)
                .filter_map(|id| inner.sinks.get(id).map(|sink| (*id, sink.clone())))
                .collect()
        };
        for (connection_id, sink) in targets {
            self.send(connection_id, &sink, event);
        }
    }

    fn deliver_identity_local(&self, identity: &str, event: &ServerEvent) {
        let targets: Vec<(ConnectionId, EventSink)> = {
            let inner = self.lock();
            let Some(connections) = inner.identities.get(identity) else {
                return;
            };
            connections
                .iter()
                .filter_map(|id| inner.sinks.get(id).map(|sink| (*id, sink.clone())))
                .collect()
        };
        for (connection_id, sink) in targets {
            self.send(connection_id, &sink, event);
        }
    }

    fn deliver_all_local(&self, event: &ServerEvent) {
        let targets: Vec<(ConnectionId, EventSink)> = {
            let inner = self.lock();
            inner
                .sinks
                .iter()
                .map(|(id, sink)| (*id, sink.clone()))
                .collect()
        };
        for (connection_id, sink) in targets {
            self.send(connection_id, &sink, event);
        }
    }

    fn send(&self, connection_id: ConnectionId, sink: &EventSink, event: &ServerEvent) {
        if sink.send(event.clone()).is_ok() {
            self.metrics.event_fanned_out();
        } else {
            // Transport already dropped the receiver; disconnect cleanup
            // will remove the sink shortly
            debug!(
                target: "rc.fanout",
                connection_id = %connection_id,
                "Dropped event for closed sink"
            );
        }
    }

    /// Mirror an event through the backplane. Failures are logged and
    /// swallowed: local delivery already happened, and the backplane is
    /// best-effort by contract.
    async fn mirror(&self, channel: &str, scope: FrameScope, event: &ServerEvent) {
        let frame = BackplaneFrame {
            origin: self.instance_id.clone(),
            scope,
            event: event.clone(),
        };
        let raw = match serde_json::to_string(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(target: "rc.fanout", error = %e, "Failed to encode backplane frame");
                return;
            }
        };
        if let Err(e) = self.backplane.publish(channel, raw).await {
            warn!(
                target: "rc.fanout",
                error = %e,
                channel,
                "Backplane mirror failed, local delivery unaffected"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FanoutInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backplane::MemoryBackplane;

    fn test_fanout(instance: &str, backplane: MemoryBackplane) -> Arc<PresenceFanout> {
        PresenceFanout::new(
            instance.to_string(),
            Arc::new(backplane),
            CoordinatorMetrics::new(),
        )
    }

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    fn kicked(room: &str) -> ServerEvent {
        ServerEvent::Kicked {
            room_id: room.to_string(),
        }
    }

    #[tokio::test]
    async fn test_room_publish_excludes_sender() {
        let fanout = test_fanout("rc-a", MemoryBackplane::new());
        let (sink_a, mut rx_a) = sink();
        let (sink_b, mut rx_b) = sink();

        fanout.register_sink(ConnectionId(1), sink_a);
        fanout.register_sink(ConnectionId(2), sink_b);
        fanout.subscribe_room("r1", ConnectionId(1));
        fanout.subscribe_room("r1", ConnectionId(2));

        fanout
            .publish_room("r1", &kicked("r1"), Some(ConnectionId(1)))
            .await;

        assert_eq!(rx_b.recv().await.unwrap(), kicked("r1"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_publish_is_room_scoped() {
        let fanout = test_fanout("rc-a", MemoryBackplane::new());
        let (sink_a, mut rx_a) = sink();
        let (sink_b, mut rx_b) = sink();

        fanout.register_sink(ConnectionId(1), sink_a);
        fanout.register_sink(ConnectionId(2), sink_b);
        fanout.subscribe_room("r1", ConnectionId(1));
        fanout.subscribe_room("r2", ConnectionId(2));

        fanout.publish_room("r1", &kicked("r1"), None).await;

        assert_eq!(rx_a.recv().await.unwrap(), kicked("r1"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_identity_publish_reaches_all_bound_connections() {
        let fanout = test_fanout("rc-a", MemoryBackplane::new());
        let (sink_a, mut rx_a) = sink();
        let (sink_b, mut rx_b) = sink();
        let (sink_c, mut rx_c) = sink();

        fanout.register_sink(ConnectionId(1), sink_a);
        fanout.register_sink(ConnectionId(2), sink_b);
        fanout.register_sink(ConnectionId(3), sink_c);
        fanout.bind_identity(ConnectionId(1), "alice");
        fanout.bind_identity(ConnectionId(2), "alice");
        fanout.bind_identity(ConnectionId(3), "bob");

        let event = ServerEvent::UserBanned {
            identity: "alice".to_string(),
            reason: "spam".to_string(),
        };
        fanout.publish_identity("alice", &event).await;

        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert_eq!(rx_b.recv().await.unwrap(), event);
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_connection_cleans_all_state() {
        let fanout = test_fanout("rc-a", MemoryBackplane::new());
        let (sink_a, mut rx_a) = sink();

        fanout.register_sink(ConnectionId(1), sink_a);
        fanout.bind_identity(ConnectionId(1), "alice");
        fanout.subscribe_room("r1", ConnectionId(1));

        fanout.remove_connection(ConnectionId(1));

        fanout.publish_room("r1", &kicked("r1"), None).await;
        fanout
            .publish_identity("alice", &kicked("r1"))
            .await;
        fanout.publish_direct(ConnectionId(1), &kicked("r1"));

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sibling_instance_receives_mirrored_room_event() {
        let backplane = MemoryBackplane::new();
        let a = test_fanout("rc-a", backplane.clone());
        let b = test_fanout("rc-b", backplane);

        let cancel = CancellationToken::new();
        a.start(cancel.clone()).await.unwrap();
        b.start(cancel.clone()).await.unwrap();

        // Instance A: conn 1 in r1. Instance B: conn 1 in r1 too
        // (connection ids are process-local and may collide).
        let (sink_a, mut rx_a) = sink();
        let (sink_b, mut rx_b) = sink();
        a.register_sink(ConnectionId(1), sink_a);
        a.subscribe_room("r1", ConnectionId(1));
        b.register_sink(ConnectionId(1), sink_b);
        b.subscribe_room("r1", ConnectionId(1));

        a.publish_room("r1", &kicked("r1"), Some(ConnectionId(1)))
            .await;

        // A excluded its local sender; B delivers to its own conn 1
        assert_eq!(rx_b.recv().await.unwrap(), kicked("r1"));
        assert!(rx_a.try_recv().is_err());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_own_mirrored_frame_is_ignored() {
        let backplane = MemoryBackplane::new();
        let a = test_fanout("rc-a", backplane);

        let cancel = CancellationToken::new();
        a.start(cancel.clone()).await.unwrap();

        let (sink_a, mut rx_a) = sink();
        a.register_sink(ConnectionId(1), sink_a);
        a.subscribe_room("r1", ConnectionId(1));

        a.publish_room("r1", &kicked("r1"), None).await;

        // Exactly one delivery: local. The mirrored frame must not
        // produce a second one.
        assert_eq!(rx_a.recv().await.unwrap(), kicked("r1"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx_a.try_recv().is_err());

        cancel.cancel();
    }
}
