use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::blockfeed::{BlockEvent, BlockFeed};
use crate::config::Config;
use crate::engine::{Estimator, EstimatorConfig, Output};
use crate::publish::{Publisher, WampPublisher, TOPIC_FEE_DIFF, TOPIC_MINED_SUMMARY, TOPIC_MIN_DIFF};
use crate::rpc::{BitcoindRpc, MempoolRpc};

/// Wait after a block notification before committing the removed window, so
/// the follow-up mempool snapshot reflects the new block.
const REMOVED_COMMIT_DELAY: Duration = Duration::from_secs(5);

/// Wires the ports to the estimator: the mempool poller and the block feed
/// fan in to one estimator task, whose emissions go out via the publisher.
pub struct FeeService {
    config: Config,
    rpc: Arc<dyn MempoolRpc>,
    publisher: Arc<dyn Publisher>,
}

impl FeeService {
    /// Connects the production ports.
    pub async fn connect(config: Config) -> Result<Self> {
        let rpc = Arc::new(BitcoindRpc::new(&config.rpc)?);
        let publisher = Arc::new(WampPublisher::connect(&config.wamp).await?);
        Ok(Self::with_ports(config, rpc, publisher))
    }

    pub fn with_ports(
        config: Config,
        rpc: Arc<dyn MempoolRpc>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            rpc,
            publisher,
        }
    }

    /// Runs the pipeline until a transport or subscription error surfaces.
    pub async fn run(&self) -> Result<()> {
        let mut engine = Estimator::new(EstimatorConfig::from_constants(&self.config.constants));

        let (block_tx, mut block_rx) = mpsc::channel::<BlockEvent>(64);
        let feed = BlockFeed::new(self.config.zmq_socket.clone());
        let mut feed_task = tokio::spawn(feed.run(block_tx));

        let (commit_tx, mut commit_rx) = mpsc::channel::<u64>(16);

        let mut poll = interval(Duration::from_millis(self.config.constants.time_res));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            period_ms = self.config.constants.time_res,
            "mempool poller started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.poll_once(&mut engine).await?;
                }
                Some(event) = block_rx.recv() => {
                    debug!(hash = %event.hash, "block notification");
                    if let Some(ibi_ms) = engine.on_block(event.at) {
                        let commit = commit_tx.clone();
                        tokio::spawn(async move {
                            sleep(REMOVED_COMMIT_DELAY).await;
                            let _ = commit.send(ibi_ms).await;
                        });
                    }
                    // Poll immediately so mined detection sees the block.
                    self.poll_once(&mut engine).await?;
                }
                Some(ibi_ms) = commit_rx.recv() => {
                    let outputs = engine.commit_removed_window(ibi_ms, Utc::now());
                    self.publish_all(outputs).await?;
                }
                result = &mut feed_task => {
                    return match result {
                        Ok(Ok(())) => Err(anyhow::anyhow!("block feed ended unexpectedly")),
                        Ok(Err(e)) => Err(e).context("block subscription failed"),
                        Err(e) => Err(e).context("block feed task panicked"),
                    };
                }
            }
        }
    }

    async fn poll_once(&self, engine: &mut Estimator) -> Result<()> {
        let raw = self
            .rpc
            .raw_mempool()
            .await
            .context("mempool RPC fetch failed")?;
        let outputs = engine.on_raw_mempool(raw, Utc::now());
        self.publish_all(outputs).await?;

        let stats = engine.stats();
        debug!(
            polls = stats.polls,
            snapshots = stats.snapshots,
            duplicates = stats.duplicates,
            parse_errors = stats.parse_errors,
            mined_events = stats.mined_events,
            emissions = stats.emissions,
            "poll complete"
        );
        Ok(())
    }

    async fn publish_all(&self, outputs: Vec<Output>) -> Result<()> {
        for output in outputs {
            let (topic, payload) = match output {
                Output::Mined(summary) => (TOPIC_MINED_SUMMARY, serde_json::to_value(summary)),
                Output::FeeDiffs(retained) => (TOPIC_FEE_DIFF, serde_json::to_value(retained)),
                Output::Recommendations(ranked) => (TOPIC_MIN_DIFF, serde_json::to_value(ranked)),
            };
            match payload {
                Ok(payload) => {
                    self.publisher
                        .publish(topic, payload)
                        .await
                        .with_context(|| format!("publishing to {}", topic))?;
                }
                // Serialization failures are local; drop the emission.
                Err(e) => warn!(topic, "payload serialization failed: {}", e),
            }
        }
        Ok(())
    }
}
