//! Coordinator metrics.
//!
//! All metrics carry the `rc_` prefix and follow Prometheus naming
//! conventions (`_total` for counters). Values are kept in atomics for
//! cheap snapshot reads in tests and health reporting, and mirrored to
//! the `metrics` facade so the Prometheus recorder in main exports them.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time snapshot of coordinator metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Currently registered connections.
    pub active_connections: u64,
    /// Rooms with at least one member on this instance.
    pub active_rooms: u64,
    /// Signaling envelopes relayed since startup.
    pub envelopes_relayed: u64,
    /// Events delivered to local sinks since startup.
    pub events_fanned_out: u64,
    /// Fire-and-forget store writes that failed.
    pub store_write_failures: u64,
}

/// Shared counters and gauges for the signaling core.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    active_connections: AtomicU64,
    active_rooms: AtomicU64,
    envelopes_relayed: AtomicU64,
    events_fanned_out: AtomicU64,
    store_write_failures: AtomicU64,
}

impl CoordinatorMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connection registered.
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        gauge!("rc_active_connections").increment(1.0);
    }

    /// A connection unregistered.
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        gauge!("rc_active_connections").decrement(1.0);
    }

    /// A room materialized.
    pub fn room_opened(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
        gauge!("rc_active_rooms").increment(1.0);
    }

    /// A room emptied and was deleted.
    pub fn room_closed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
        gauge!("rc_active_rooms").decrement(1.0);
    }

    /// An envelope was routed to at least the relay decision stage.
    pub fn envelope_relayed(&self, kind: &'static str) {
        self.envelopes_relayed.fetch_add(1, Ordering::Relaxed);
        counter!("rc_envelopes_relayed_total", "kind" => kind).increment(1);
    }

    /// An event was delivered to a local sink.
    pub fn event_fanned_out(&self) {
        self.events_fanned_out.fetch_add(1, Ordering::Relaxed);
        counter!("rc_events_fanned_out_total").increment(1);
    }

    /// A fire-and-forget store write failed.
    pub fn store_write_failed(&self, operation: &'static str) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
        counter!("rc_store_write_failures_total", "operation" => operation).increment(1);
    }

    /// Read all values at once.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            active_rooms: self.active_rooms.load(Ordering::Relaxed),
            envelopes_relayed: self.envelopes_relayed.load(Ordering::Relaxed),
            events_fanned_out: self.events_fanned_out.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_counts() {
        let metrics = CoordinatorMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.room_opened();
        metrics.envelope_relayed("offer");
        metrics.envelope_relayed("answer");
        metrics.event_fanned_out();
        metrics.store_write_failed("append_message");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.active_rooms, 1);
        assert_eq!(snapshot.envelopes_relayed, 2);
        assert_eq!(snapshot.events_fanned_out, 1);
        assert_eq!(snapshot.store_write_failures, 1);
    }

    #[test]
    fn test_room_close_balances_open() {
        let metrics = CoordinatorMetrics::new();
        metrics.room_opened();
        metrics.room_closed();
        assert_eq!(metrics.snapshot().active_rooms, 0);
    }
}
