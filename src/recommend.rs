use serde::Serialize;

use crate::kinematics::FeeEstimate;

/// One point of the fee curve with its marginal slope, published on
/// `com.fee.feediff`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeDiffEntry {
    pub target_block: u32,
    pub fee_rate: f64,
    pub timestamp: i64,
    /// Fee-rate change per extra block of patience; non-positive on a
    /// healthy curve.
    pub diff: f64,
    #[serde(skip)]
    prev_fee_rate: f64,
}

/// A scored target/fee pair, published ranked on `com.fee.mindiff`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub target_block: u32,
    pub fee_rate: f64,
    pub timestamp: i64,
    pub diff: f64,
    pub cum_diff: f64,
    pub valid: bool,
}

impl Recommendation {
    /// Local marginal benefit weighted by cumulative benefit, penalized by
    /// the wait. Lower is better.
    pub fn cost(&self) -> f64 {
        (self.diff * self.cum_diff).sqrt() / self.target_block as f64
    }
}

/// Computes the marginal slope of the fee curve across consecutive targets.
/// Entries where the fee rises with longer waits are dropped.
pub fn fee_diffs(estimates: &[FeeEstimate]) -> Vec<FeeDiffEntry> {
    let mut retained = Vec::with_capacity(estimates.len());
    for (i, estimate) in estimates.iter().enumerate() {
        let (diff, prev_fee_rate) = if i == 0 {
            (0.0, estimate.fee_rate)
        } else {
            let prev = &estimates[i - 1];
            let blocks = (estimate.target_block - prev.target_block) as f64;
            ((estimate.fee_rate - prev.fee_rate) / blocks, prev.fee_rate)
        };
        if diff <= 0.0 {
            retained.push(FeeDiffEntry {
                target_block: estimate.target_block,
                fee_rate: estimate.fee_rate,
                timestamp: estimate.timestamp,
                diff,
                prev_fee_rate,
            });
        }
    }
    retained
}

/// Scores the retained fee-curve entries and returns the valid ones ranked
/// by cost, best first.
///
/// An entry is valid when its marginal discount clears `min_savings_rate`
/// relative to the previous target's fee, or when the curve is flat after
/// savings have already accumulated.
pub fn rank(retained: &[FeeDiffEntry], min_savings_rate: f64) -> Vec<Recommendation> {
    let mut cum_diff = 0.0;
    let mut valid = Vec::new();
    for entry in retained {
        cum_diff += entry.diff;
        let is_valid = if entry.diff < 0.0 {
            entry.prev_fee_rate > 0.0 && -entry.diff / entry.prev_fee_rate >= min_savings_rate
        } else {
            cum_diff < 0.0
        };
        if is_valid {
            valid.push(Recommendation {
                target_block: entry.target_block,
                fee_rate: entry.fee_rate,
                timestamp: entry.timestamp,
                diff: entry.diff,
                cum_diff,
                valid: true,
            });
        }
    }
    valid.sort_by(|a, b| {
        a.cost()
            .total_cmp(&b.cost())
            .then(a.target_block.cmp(&b.target_block))
    });
    valid
}
