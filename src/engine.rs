use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::config::Constants;
use crate::diff::SnapshotDelta;
use crate::kinematics::{FeeEstimate, TargetLane};
use crate::mined::MinedSummary;
use crate::recommend::{fee_diffs, rank, FeeDiffEntry, Recommendation};
use crate::snapshot::MempoolSnapshot;
use crate::window::{AddedWindow, QueuedBytes, RemovedWindow};

/// Knobs the estimator consumes, derived from [`Constants`].
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub block_effective_size: u64,
    /// Confirmation targets the fee curve spans.
    pub targets: Vec<u32>,
    pub added_window_ms: u64,
    pub removed_window_blocks: usize,
    pub min_savings_rate: f64,
}

impl EstimatorConfig {
    pub fn from_constants(constants: &Constants) -> Self {
        Self {
            block_effective_size: constants.block_effective_size(),
            targets: (1..=4).collect(),
            added_window_ms: constants.int_time_added,
            removed_window_blocks: constants.int_blocks_removed,
            min_savings_rate: constants.min_savings_rate,
        }
    }
}

/// An emission produced by the estimator, in publish order.
#[derive(Debug, Clone)]
pub enum Output {
    Mined(MinedSummary),
    FeeDiffs(Vec<FeeDiffEntry>),
    Recommendations(Vec<Recommendation>),
}

/// Counters for observability; logged on the polling cadence.
#[derive(Debug, Default, Clone)]
pub struct EstimatorStats {
    pub polls: u64,
    pub snapshots: u64,
    pub duplicates: u64,
    pub parse_errors: u64,
    pub blocks_seen: u64,
    pub mined_events: u64,
    pub emissions: u64,
}

/// The serialized fan-in point of the pipeline.
///
/// All events (snapshots, block notifications, removed-window commits) are
/// fed from one logical scheduler; the per-target lanes are memoized here so
/// every event reuses the same window buffers. Snapshot pairs are diffed on
/// arrival; only the latest one is retained afterwards.
pub struct Estimator {
    cfg: EstimatorConfig,
    latest: Option<MempoolSnapshot>,
    added: AddedWindow,
    removed: RemovedWindow,
    /// Removals observed since the last committed block event.
    pending_removed: Vec<QueuedBytes>,
    last_block_at: Option<DateTime<Utc>>,
    last_ibi_ms: Option<u64>,
    lanes: Vec<TargetLane>,
    /// Fee rates of the last published curve, for change detection.
    last_curve: Option<Vec<(u32, f64)>>,
    stats: EstimatorStats,
}

impl Estimator {
    pub fn new(cfg: EstimatorConfig) -> Self {
        let lanes = cfg
            .targets
            .iter()
            .map(|&target| TargetLane::new(target, cfg.block_effective_size))
            .collect();
        Self {
            added: AddedWindow::new(cfg.added_window_ms),
            removed: RemovedWindow::new(cfg.removed_window_blocks),
            cfg,
            latest: None,
            pending_removed: Vec::new(),
            last_block_at: None,
            last_ibi_ms: None,
            lanes,
            last_curve: None,
            stats: EstimatorStats::default(),
        }
    }

    pub fn stats(&self) -> &EstimatorStats {
        &self.stats
    }

    /// Packs a raw mempool response and ingests it.
    pub fn on_raw_mempool(&mut self, raw: HashMap<String, Value>, now: DateTime<Utc>) -> Vec<Output> {
        let (snapshot, skipped) =
            MempoolSnapshot::pack(raw, self.cfg.block_effective_size, now);
        if skipped > 0 {
            self.stats.parse_errors += skipped as u64;
            debug!(skipped, "skipped malformed mempool entries");
        }
        self.on_snapshot(snapshot)
    }

    /// Ingests a packed snapshot and returns the emissions it produced.
    ///
    /// A snapshot structurally identical to the last one is not re-emitted
    /// downstream, but the windows still age against its capture time.
    pub fn on_snapshot(&mut self, snapshot: MempoolSnapshot) -> Vec<Output> {
        let now = snapshot.taken_at;
        self.stats.polls += 1;
        self.added.prune(now);

        if let Some(latest) = &self.latest {
            if latest.same_contents(&snapshot) {
                self.stats.duplicates += 1;
                return self.refresh(now);
            }
        }
        self.stats.snapshots += 1;

        let mut outputs = Vec::new();
        if let Some(prev) = self.latest.take() {
            let delta = SnapshotDelta::between(&prev, &snapshot);
            if !delta.added.is_empty() {
                self.added
                    .push(now, delta.added.iter().map(QueuedBytes::from).collect());
            }
            if !delta.removed.is_empty() {
                self.pending_removed
                    .extend(delta.removed.iter().map(QueuedBytes::from));
            }
            if delta.is_mined_block() {
                self.stats.mined_events += 1;
                match self.last_ibi_ms {
                    Some(ibi_ms) => {
                        if let Some(summary) =
                            MinedSummary::from_removed(&delta.removed, ibi_ms, now)
                        {
                            outputs.push(Output::Mined(summary));
                        }
                    }
                    // Pairing with an interval needs two block notifications.
                    None => debug!("mined block before first interval, summary suppressed"),
                }
            }
        }
        self.latest = Some(snapshot);

        outputs.extend(self.refresh(now));
        outputs
    }

    /// Records a block-hash notification and returns the inter-block
    /// interval it closes, if one is known.
    pub fn on_block(&mut self, at: DateTime<Utc>) -> Option<u64> {
        self.stats.blocks_seen += 1;
        let ibi_ms = self
            .last_block_at
            .map(|prev| (at - prev).num_milliseconds().max(0) as u64);
        self.last_block_at = Some(at);
        if let Some(ibi_ms) = ibi_ms {
            self.last_ibi_ms = Some(ibi_ms);
        }
        ibi_ms
    }

    /// Flushes the removals buffered since the last block into the removed
    /// window, paired with that block's inter-block interval. The service
    /// calls this a few seconds after each notification, once the follow-up
    /// snapshot has been observed.
    pub fn commit_removed_window(&mut self, ibi_ms: u64, now: DateTime<Utc>) -> Vec<Output> {
        let txs = std::mem::take(&mut self.pending_removed);
        self.removed.push(txs, ibi_ms);
        self.refresh(now)
    }

    /// Re-runs every target lane against the current windows and snapshot,
    /// recombining the fee curve when any estimate moved.
    fn refresh(&mut self, now: DateTime<Utc>) -> Vec<Output> {
        let Some(snapshot) = &self.latest else {
            return Vec::new();
        };

        let mut any_changed = false;
        for lane in &mut self.lanes {
            if lane.refresh(&self.added, &self.removed, snapshot, now) {
                any_changed = true;
            }
        }
        if !any_changed {
            return Vec::new();
        }

        // The curve combines the latest estimate of every target; it is not
        // a synchronous sample, but all targets must have emitted once.
        let estimates: Vec<FeeEstimate> = self
            .lanes
            .iter()
            .filter_map(|lane| lane.estimate().cloned())
            .collect();
        if estimates.len() != self.lanes.len() {
            return Vec::new();
        }

        let curve: Vec<(u32, f64)> = estimates
            .iter()
            .map(|e| (e.target_block, e.fee_rate))
            .collect();
        if self.last_curve.as_ref() == Some(&curve) {
            return Vec::new();
        }
        self.last_curve = Some(curve);

        let retained = fee_diffs(&estimates);
        let ranked = rank(&retained, self.cfg.min_savings_rate);
        self.stats.emissions += 1;
        vec![Output::FeeDiffs(retained), Output::Recommendations(ranked)]
    }
}
