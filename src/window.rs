use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::snapshot::MempoolTx;

/// A transaction's size and queue coordinate, captured when it entered or
/// left the mempool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedBytes {
    pub size: u64,
    pub cum_size: u64,
}

impl From<&MempoolTx> for QueuedBytes {
    fn from(tx: &MempoolTx) -> Self {
        Self {
            size: tx.size,
            cum_size: tx.cum_size,
        }
    }
}

/// Trailing wall-clock buffer of transactions added to the mempool.
#[derive(Debug)]
pub struct AddedWindow {
    window: Duration,
    samples: VecDeque<(DateTime<Utc>, Vec<QueuedBytes>)>,
}

impl AddedWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::milliseconds(window_ms as i64),
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, txs: Vec<QueuedBytes>) {
        self.samples.push_back((at, txs));
    }

    /// Drops samples that have aged out of the trailing window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.window;
        while self
            .samples
            .front()
            .is_some_and(|(at, _)| *at <= horizon)
        {
            self.samples.pop_front();
        }
    }

    /// Bytes per ten minutes entering the queue ahead of `boundary`.
    pub fn bytes_ahead(&self, boundary: u64) -> f64 {
        let window_ms = self.window.num_milliseconds();
        if window_ms <= 0 {
            return 0.0;
        }
        let sum: u64 = self
            .samples
            .iter()
            .flat_map(|(_, txs)| txs.iter())
            .filter(|tx| tx.cum_size < boundary)
            .map(|tx| tx.size)
            .sum();
        sum as f64 / window_ms as f64 * 600_000.0
    }
}

/// Transactions removed from the mempool, coalesced over the last N block
/// events together with their inter-block intervals.
#[derive(Debug)]
pub struct RemovedWindow {
    span: usize,
    samples: VecDeque<RemovedSample>,
}

#[derive(Debug)]
struct RemovedSample {
    txs: Vec<QueuedBytes>,
    ibi_ms: u64,
}

impl RemovedWindow {
    pub fn new(span: usize) -> Self {
        Self {
            span,
            samples: VecDeque::new(),
        }
    }

    /// Records one block event's removals. An empty removal still
    /// contributes its interval to the denominator.
    pub fn push(&mut self, txs: Vec<QueuedBytes>, ibi_ms: u64) {
        self.samples.push_back(RemovedSample { txs, ibi_ms });
        while self.samples.len() > self.span {
            self.samples.pop_front();
        }
    }

    /// Bytes per ten minutes leaving the queue ahead of `boundary`.
    ///
    /// `None` until a block event has been recorded, or when the summed
    /// interval is zero.
    pub fn bytes_ahead(&self, boundary: u64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum_ibi: u64 = self.samples.iter().map(|s| s.ibi_ms).sum();
        if sum_ibi == 0 {
            return None;
        }
        let sum: u64 = self
            .samples
            .iter()
            .flat_map(|s| s.txs.iter())
            .filter(|tx| tx.cum_size < boundary)
            .map(|tx| tx.size)
            .sum();
        Some(sum as f64 / (sum_ibi as f64 / 60_000.0) * 10.0)
    }
}
