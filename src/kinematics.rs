use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::FeewatchError;
use crate::snapshot::MempoolSnapshot;
use crate::window::{AddedWindow, RemovedWindow};

/// Safety undershoot applied to the selected fee rate, so heavy competitive
/// use does not ratchet the estimate upward against itself.
pub const FEE_UNDERSHOOT: f64 = 0.999;

/// A fee estimate for one confirmation target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub target_block: u32,
    pub fee_rate: f64,
    pub timestamp: i64,
}

/// Back-projects the queue coordinate a transaction must occupy today to be
/// inside the target boundary once `target` blocks have been mined, treating
/// the boundary as a 1-D trajectory over block time.
pub fn initial_position(final_position: f64, velocity: f64, acceleration: f64, target: u32) -> f64 {
    let t = target as f64;
    final_position - (velocity * t + 0.5 * acceleration * t * t)
}

/// The estimation stages for one confirmation target.
///
/// Lanes are memoized by the engine so repeated refreshes share the window
/// buffers; every stage holds its last value and propagates only on change.
#[derive(Debug)]
pub struct TargetLane {
    target: u32,
    boundary: u64,
    added_rate: Option<f64>,
    removed_rate: Option<f64>,
    velocity: Option<f64>,
    acceleration: Option<f64>,
    initial_position: Option<f64>,
    estimate: Option<FeeEstimate>,
}

impl TargetLane {
    pub fn new(target: u32, block_effective_size: u64) -> Self {
        Self {
            target,
            boundary: target as u64 * block_effective_size,
            added_rate: None,
            removed_rate: None,
            velocity: None,
            acceleration: None,
            initial_position: None,
            estimate: None,
        }
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn velocity(&self) -> Option<f64> {
        self.velocity
    }

    pub fn acceleration(&self) -> Option<f64> {
        self.acceleration
    }

    pub fn initial_position(&self) -> Option<f64> {
        self.initial_position
    }

    pub fn estimate(&self) -> Option<&FeeEstimate> {
        self.estimate.as_ref()
    }

    /// Runs the stage chain against the shared windows and the latest
    /// snapshot. Returns whether the fee estimate changed.
    pub fn refresh(
        &mut self,
        added: &AddedWindow,
        removed: &RemovedWindow,
        snapshot: &MempoolSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        let add = added.bytes_ahead(self.boundary);
        let added_changed = self.added_rate != Some(add);
        self.added_rate = Some(add);

        // A degenerate removed window keeps the last emitted rate.
        let removed_changed = match removed.bytes_ahead(self.boundary) {
            Some(rate) => {
                let changed = self.removed_rate != Some(rate);
                self.removed_rate = Some(rate);
                changed
            }
            None => false,
        };

        if added_changed || removed_changed {
            if let (Some(add), Some(rm)) = (self.added_rate, self.removed_rate) {
                let velocity = add - rm;
                if self.velocity != Some(velocity) {
                    // First discrete difference; the first sample emits
                    // itself as the seed.
                    let previous = self.velocity.unwrap_or(0.0);
                    self.velocity = Some(velocity);
                    self.acceleration = Some(velocity - previous);
                }
            }
        }

        let (Some(velocity), Some(acceleration)) = (self.velocity, self.acceleration) else {
            return false;
        };
        // Suppress until the snapshot extends past the target boundary.
        let Some(final_position) = snapshot.final_position(self.target) else {
            return false;
        };

        let x0 = initial_position(final_position as f64, velocity, acceleration, self.target);
        if !x0.is_finite() {
            debug!(
                lane = self.target,
                "{}",
                FeewatchError::Arithmetic("non-finite initial position".to_string())
            );
            return false;
        }
        self.initial_position = Some(x0);

        let Some(tx) = snapshot.closest_to(x0) else {
            return false;
        };
        let fee_rate = tx.fee_rate * FEE_UNDERSHOOT;
        let changed = self.estimate.as_ref().map(|e| e.fee_rate) != Some(fee_rate);
        if changed {
            self.estimate = Some(FeeEstimate {
                target_block: self.target,
                fee_rate,
                timestamp: now.timestamp_millis(),
            });
        }
        changed
    }
}
