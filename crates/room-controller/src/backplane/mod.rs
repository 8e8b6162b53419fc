//! Pub/sub backplane for multi-instance event delivery.
//!
//! Presence Fanout is the only component that touches the backplane.
//! Frames are JSON strings carrying the origin instance id so an
//! instance can ignore its own mirrored events.

use crate::errors::CoreError;
use tokio::sync::mpsc;

pub mod memory;
pub mod redis;

pub use memory::MemoryBackplane;
pub use redis::RedisBackplane;

/// Channel for room-scoped events (presence, chat, broadcast relays).
pub const ROOMS_CHANNEL: &str = "parley.rooms";

/// Channel for identity-addressed events (private messages, ban notices,
/// admin broadcasts).
pub const DIRECT_CHANNEL: &str = "parley.direct";

/// Buffer size for subscription delivery channels.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

/// A pub/sub backplane connecting sibling instances.
///
/// Delivery is at-least-once with no global ordering guarantee; frame
/// consumers must tolerate duplicates and their own mirrored frames.
#[async_trait::async_trait]
pub trait Backplane: Send + Sync {
    /// Publish a frame to a channel.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), CoreError>;

    /// Subscribe to a channel. Frames arrive on the returned receiver
    /// until the backplane or the receiver is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CoreError>;
}
