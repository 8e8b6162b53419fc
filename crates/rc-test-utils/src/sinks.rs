//! Event sink helpers for observing coordinator deliveries.

use room_controller::events::ServerEvent;
use room_controller::fanout::EventSink;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Default wait for an expected delivery before a test fails.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Create a sink/receiver pair to register with a coordinator.
#[must_use]
pub fn event_sink() -> (EventSink, UnboundedReceiver<ServerEvent>) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Receive the next event, panicking if none arrives in time.
pub async fn recv_event(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Drop everything currently queued on a receiver.
pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) {
    while rx.try_recv().is_ok() {}
}
