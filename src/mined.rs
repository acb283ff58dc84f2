use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::MempoolTx;

/// Tail slices over which the mean fee rate of a mined block is reported,
/// from the cheapest 40% down to the cheapest 0.1%.
pub const TAIL_QUANTILES: [f64; 7] = [0.4, 0.2, 0.1, 0.05, 0.01, 0.005, 0.001];

/// Summary of a mined-block removal event, published on
/// `com.fee.minedtxssummary`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedSummary {
    /// Inter-block interval in minutes.
    pub ibi: f64,
    pub date: DateTime<Utc>,
    /// Number of transactions mined out of the mempool.
    pub txs: usize,
    /// Aggregate size in megabytes.
    pub block_size: f64,
    pub timestamp: i64,
    /// Mean fee rate of the lowest-fee tail, per quantile.
    pub fee: BTreeMap<String, f64>,
    /// The cheapest transaction that still made the block.
    pub min_fee_tx: MempoolTx,
}

impl MinedSummary {
    /// Builds a summary from the removed set of a mined-block event and the
    /// most recent inter-block interval.
    pub fn from_removed(removed: &[MempoolTx], ibi_ms: u64, at: DateTime<Utc>) -> Option<Self> {
        if removed.is_empty() {
            return None;
        }

        let mut sorted: Vec<&MempoolTx> = removed.iter().collect();
        sorted.sort_unstable_by(|a, b| {
            b.fee_rate
                .total_cmp(&a.fee_rate)
                .then_with(|| a.txid.cmp(&b.txid))
        });

        let mut fee = BTreeMap::new();
        for q in TAIL_QUANTILES {
            fee.insert(format!("{}", q), tail_mean(&sorted, q));
        }

        let min_fee_tx = (*sorted.last().expect("non-empty removal")).clone();
        let block_size = removed.iter().map(|tx| tx.size).sum::<u64>() as f64 / 1_000_000.0;

        Some(Self {
            ibi: ibi_ms as f64 / 60_000.0,
            date: at,
            txs: removed.len(),
            block_size,
            timestamp: at.timestamp_millis(),
            fee,
            min_fee_tx,
        })
    }
}

/// Mean fee rate of the last `⌈n·q⌉` entries of a fee-rate-descending list,
/// i.e. the cheapest tail of the block.
fn tail_mean(sorted_desc: &[&MempoolTx], q: f64) -> f64 {
    let len = sorted_desc.len();
    let take = ((len as f64) * q).ceil() as usize;
    let take = take.clamp(1, len);
    let tail = &sorted_desc[len - take..];
    tail.iter().map(|tx| tx.fee_rate).sum::<f64>() / take as f64
}
