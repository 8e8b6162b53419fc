//! Multi-instance fanout through a shared backplane.
//!
//! Two full coordination cores share one in-process backplane (clones of
//! a `MemoryBackplane` behave like sibling instances on one Redis).
//! Connections land on different instances but must still see each
//! other's room events, identity-scoped deliveries, and admin
//! broadcasts exactly once.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use common::types::ConnectionId;
use rc_test_utils::{event_sink, recv_event, MockCredentialStore, MockPersistenceStore};
use room_controller::backplane::MemoryBackplane;
use room_controller::coordinator::SessionCoordinator;
use room_controller::events::{BroadcastScope, ClientEvent, ServerEvent};
use room_controller::fanout::PresenceFanout;
use room_controller::observability::CoordinatorMetrics;
use room_controller::registry::ConnectionRegistry;
use room_controller::rooms::RoomDirectory;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

struct Instance {
    coordinator: Arc<SessionCoordinator>,
    cancel: CancellationToken,
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn instance(name: &str, backplane: MemoryBackplane) -> Instance {
    let credentials = MockCredentialStore::new()
        .with_user("alice", "proof-a")
        .with_user("bob", "proof-b")
        .with_admin("root", "proof-r");

    let metrics = CoordinatorMetrics::new();
    let fanout = PresenceFanout::new(
        name.to_string(),
        Arc::new(backplane),
        Arc::clone(&metrics),
    );
    let cancel = CancellationToken::new();
    fanout.start(cancel.child_token()).await.unwrap();

    let directory = RoomDirectory::new(
        Arc::clone(&fanout),
        Arc::clone(&metrics),
        64,
        cancel.clone(),
    );
    let coordinator = SessionCoordinator::new(
        Arc::new(ConnectionRegistry::new(100)),
        directory,
        fanout,
        Arc::new(credentials),
        Arc::new(MockPersistenceStore::new()),
        metrics,
    );

    Instance { coordinator, cancel }
}

impl Instance {
    async fn login(&self, identity: &str, proof: &str) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, mut rx) = event_sink();
        let id = self.coordinator.connect(tx).unwrap();
        self.coordinator
            .handle_event(
                id,
                ClientEvent::Authenticate {
                    identity: identity.to_string(),
                    proof: proof.to_string(),
                },
            )
            .await;
        assert!(matches!(
            recv_event(&mut rx).await,
            ServerEvent::Authenticated { .. }
        ));
        (id, rx)
    }

    async fn join(&self, id: ConnectionId, rx: &mut UnboundedReceiver<ServerEvent>, room: &str, name: &str) {
        self.coordinator
            .handle_event(
                id,
                ClientEvent::Join {
                    room_id: room.to_string(),
                    display_name: name.to_string(),
                },
            )
            .await;
        assert!(matches!(
            recv_event(rx).await,
            ServerEvent::RoomUsers { .. }
        ));
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn room_events_cross_instances_exactly_once() {
    let backplane = MemoryBackplane::new();
    let a = instance("rc-a", backplane.clone()).await;
    let b = instance("rc-b", backplane).await;

    let (alice, mut rx_alice) = a.login("alice", "proof-a").await;
    let (bob, mut rx_bob) = b.login("bob", "proof-b").await;

    a.join(alice, &mut rx_alice, "r1", "alice").await;
    b.join(bob, &mut rx_bob, "r1", "bob").await;

    // Alice (instance A) hears bob's join mirrored from instance B
    match recv_event(&mut rx_alice).await {
        ServerEvent::UserJoined { room_id, user } => {
            assert_eq!(room_id, "r1");
            assert_eq!(user.display_name, "bob");
        }
        other => panic!("expected user_joined, got {other:?}"),
    }
    settle().await;
    assert!(
        rx_alice.try_recv().is_err(),
        "the mirrored frame must not be delivered twice"
    );

    // Room chat from alice reaches bob across the backplane
    a.coordinator
        .handle_event(
            alice,
            ClientEvent::Message {
                text: "hello from A".to_string(),
            },
        )
        .await;
    match recv_event(&mut rx_bob).await {
        ServerEvent::Message { from, text, .. } => {
            assert_eq!(from, "alice");
            assert_eq!(text, "hello from A");
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn private_messages_reach_identities_on_other_instances() {
    let backplane = MemoryBackplane::new();
    let a = instance("rc-a", backplane.clone()).await;
    let b = instance("rc-b", backplane).await;

    let (alice, _rx_alice) = a.login("alice", "proof-a").await;
    let (_bob, mut rx_bob) = b.login("bob", "proof-b").await;

    a.coordinator
        .handle_event(
            alice,
            ClientEvent::PrivateMessage {
                to: "bob".to_string(),
                text: "psst across instances".to_string(),
            },
        )
        .await;

    match recv_event(&mut rx_bob).await {
        ServerEvent::PrivateMessage { from, to, text, .. } => {
            assert_eq!(from, "alice");
            assert_eq!(to, "bob");
            assert_eq!(text, "psst across instances");
        }
        other => panic!("expected private message, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_broadcast_reaches_every_instance() {
    let backplane = MemoryBackplane::new();
    let a = instance("rc-a", backplane.clone()).await;
    let b = instance("rc-b", backplane).await;

    let (root, mut rx_root) = a.login("root", "proof-r").await;
    let (_bob, mut rx_bob) = b.login("bob", "proof-b").await;

    a.coordinator
        .handle_event(
            root,
            ClientEvent::AdminBroadcast {
                target: BroadcastScope::All,
                text: "maintenance at noon".to_string(),
            },
        )
        .await;

    for rx in [&mut rx_root, &mut rx_bob] {
        match recv_event(rx).await {
            ServerEvent::PrivateMessage { from, to, text, .. } => {
                assert_eq!(from, "root");
                assert_eq!(to, "all");
                assert_eq!(text, "maintenance at noon");
            }
            other => panic!("expected broadcast message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn kick_notice_stays_on_the_target_instance() {
    // Connection-targeted deliveries never cross the backplane: ids are
    // process-local, so the same numeric id on a sibling instance is a
    // different, unrelated peer
    let backplane = MemoryBackplane::new();
    let a = instance("rc-a", backplane.clone()).await;
    let b = instance("rc-b", backplane).await;

    let (root, mut rx_root) = a.login("root", "proof-r").await;
    let (bob, mut rx_bob_a) = a.login("bob", "proof-b").await;
    // Bob's id on instance B may collide with ids on A
    let (_bystander, mut rx_bystander) = b.login("alice", "proof-a").await;

    a.join(root, &mut rx_root, "r1", "root").await;
    a.join(bob, &mut rx_bob_a, "r1", "bob").await;
    settle().await;
    while rx_root.try_recv().is_ok() {}

    a.coordinator
        .handle_event(root, ClientEvent::AdminKick { target: bob })
        .await;

    assert_eq!(
        recv_event(&mut rx_bob_a).await,
        ServerEvent::Kicked {
            room_id: "r1".to_string(),
        }
    );
    settle().await;
    assert!(rx_bystander.try_recv().is_err());
}
