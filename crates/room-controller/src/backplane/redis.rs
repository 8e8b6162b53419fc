//! Redis pub/sub backplane adapter.
//!
//! Publishing goes through a `MultiplexedConnection`, which is designed
//! to be cloned cheaply and used concurrently; each publish clones the
//! connection rather than sharing via a lock. Each subscription opens a
//! dedicated pub/sub connection and pumps messages into an mpsc channel
//! from a spawned task.
//!
//! The Redis URL may embed credentials and is never logged.

use super::{Backplane, SUBSCRIPTION_BUFFER};
use crate::errors::CoreError;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Redis-backed [`Backplane`].
#[derive(Clone)]
pub struct RedisBackplane {
    /// Client kept for opening per-subscription pub/sub connections.
    client: Client,
    /// Shared publish connection (cheaply cloneable).
    connection: MultiplexedConnection,
}

impl RedisBackplane {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Backplane`] if the client cannot be opened or
    /// the initial connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, CoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url; it may contain credentials
            error!(
                target: "rc.backplane.redis",
                error = %e,
                "Failed to open Redis client"
            );
            CoreError::Backplane(format!("failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "rc.backplane.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                CoreError::Backplane(format!("failed to connect to Redis: {e}"))
            })?;

        debug!(target: "rc.backplane.redis", "Redis backplane connected");
        Ok(Self { client, connection })
    }
}

#[async_trait::async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), CoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.publish(channel, payload).await.map_err(|e| {
            warn!(
                target: "rc.backplane.redis",
                error = %e,
                channel,
                "Backplane publish failed"
            );
            CoreError::Backplane(format!("publish to {channel} failed: {e}"))
        })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CoreError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            error!(
                target: "rc.backplane.redis",
                error = %e,
                channel,
                "Failed to open pub/sub connection"
            );
            CoreError::Backplane(format!("pub/sub connection failed: {e}"))
        })?;

        pubsub.subscribe(channel).await.map_err(|e| {
            error!(
                target: "rc.backplane.redis",
                error = %e,
                channel,
                "Failed to subscribe"
            );
            CoreError::Backplane(format!("subscribe to {channel} failed: {e}"))
        })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            target: "rc.backplane.redis",
                            error = %e,
                            channel = %channel_name,
                            "Dropping undecodable backplane frame"
                        );
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    // Subscriber gone; stop pumping
                    break;
                }
            }
            debug!(
                target: "rc.backplane.redis",
                channel = %channel_name,
                "Subscription stream ended"
            );
        });

        Ok(rx)
    }
}
