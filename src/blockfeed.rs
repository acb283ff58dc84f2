use std::time::{Duration, Instant};

use anyhow::Result;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

use crate::config::ZmqConfig;
use crate::error::FeewatchError;

/// A block-hash notification from the node.
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub hash: BlockHash,
    pub at: DateTime<Utc>,
}

/// A connection must stay up this long before it earns its reconnection
/// attempts back; a flapping endpoint keeps burning the same allowance.
const HEALTHY_CONNECTION: Duration = Duration::from_secs(60);

/// ZMQ `hashblock` subscription with bounded reconnection.
///
/// The socket is scoped to the running task: dropping the task closes it.
pub struct BlockFeed {
    cfg: ZmqConfig,
}

impl BlockFeed {
    pub fn new(cfg: ZmqConfig) -> Self {
        Self { cfg }
    }

    /// Runs until the receiver is dropped or the reconnection attempts are
    /// exhausted, in which case a terminal subscription error surfaces.
    pub async fn run(self, events: mpsc::Sender<BlockEvent>) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            let connected_at = Instant::now();
            match self.subscribe_loop(&events).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if connected_at.elapsed() >= HEALTHY_CONNECTION {
                        attempts = 0;
                    }
                    attempts += 1;
                    if attempts > self.cfg.max_reconnects {
                        return Err(FeewatchError::Subscription(format!(
                            "giving up after {} reconnection attempts: {}",
                            self.cfg.max_reconnects, e
                        ))
                        .into());
                    }
                    warn!(
                        attempt = attempts,
                        max = self.cfg.max_reconnects,
                        "block feed error: {}, reconnecting",
                        e
                    );
                    sleep(Duration::from_millis(self.cfg.reconnect_delay_ms)).await;
                }
            }
        }
    }

    async fn subscribe_loop(&self, events: &mpsc::Sender<BlockEvent>) -> Result<()> {
        let mut socket = SubSocket::new();
        socket
            .connect(&self.cfg.url)
            .await
            .map_err(|e| FeewatchError::Subscription(e.to_string()))?;
        socket
            .subscribe("hashblock")
            .await
            .map_err(|e| FeewatchError::Subscription(e.to_string()))?;
        info!(url = %self.cfg.url, "block feed open");

        loop {
            let message = socket
                .recv()
                .await
                .map_err(|e| FeewatchError::Subscription(e.to_string()))?;

            // Frames are [topic, hash, sequence]; tolerate single-frame
            // publishers.
            let Some(frame) = message.get(1).or_else(|| message.get(0)) else {
                continue;
            };
            match BlockHash::from_slice(&frame[..]) {
                Ok(hash) => {
                    debug!(%hash, "block hash received");
                    if events
                        .send(BlockEvent {
                            hash,
                            at: Utc::now(),
                        })
                        .await
                        .is_err()
                    {
                        // Estimator gone; shut the subscription down.
                        return Ok(());
                    }
                }
                Err(_) => debug!(bytes = frame.len(), "unparseable block hash frame"),
            }
        }
    }
}
