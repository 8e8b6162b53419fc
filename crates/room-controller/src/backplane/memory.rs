//! In-process backplane for single-instance deployments and tests.
//!
//! A broadcast channel per logical pub/sub channel. Cloning the
//! backplane shares the channel table, so two "instances" holding clones
//! of the same `MemoryBackplane` see each other's frames exactly like
//! siblings sharing a Redis deployment.

use super::{Backplane, SUBSCRIPTION_BUFFER};
use crate::errors::CoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Capacity of each in-process broadcast channel. Lagging subscribers
/// lose the oldest frames, mirroring the backplane's best-effort
/// delivery contract.
const BROADCAST_CAPACITY: usize = 1024;

/// In-memory [`Backplane`].
#[derive(Clone, Default)]
pub struct MemoryBackplane {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryBackplane {
    /// Create an empty backplane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl Backplane for MemoryBackplane {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), CoreError> {
        // No subscribers is fine; frames to an empty channel just vanish
        let _ = self.sender_for(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CoreError> {
        let mut source = self.sender_for(channel).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(
                            target: "rc.backplane",
                            channel = %channel_name,
                            skipped,
                            "Subscriber lagged, frames dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
