use std::collections::HashSet;

use bitcoin::Txid;

use crate::snapshot::{MempoolSnapshot, MempoolTx};

/// Removals larger than this are classified as a mined block rather than
/// eviction churn, which is typically far smaller.
pub const MINED_TX_THRESHOLD: usize = 500;

/// The txid difference between two successive snapshots.
///
/// `added` carries entries from the newer snapshot (with its packing
/// coordinates), `removed` entries from the older one.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDelta {
    pub added: Vec<MempoolTx>,
    pub removed: Vec<MempoolTx>,
}

impl SnapshotDelta {
    pub fn between(prev: &MempoolSnapshot, next: &MempoolSnapshot) -> Self {
        let prev_ids: HashSet<Txid> = prev.txs.iter().map(|tx| tx.txid).collect();
        let next_ids: HashSet<Txid> = next.txs.iter().map(|tx| tx.txid).collect();
        let added = next
            .txs
            .iter()
            .filter(|tx| !prev_ids.contains(&tx.txid))
            .cloned()
            .collect();
        let removed = prev
            .txs
            .iter()
            .filter(|tx| !next_ids.contains(&tx.txid))
            .cloned()
            .collect();
        Self { added, removed }
    }

    /// Whether this removal is large enough to be a mined block.
    pub fn is_mined_block(&self) -> bool {
        self.removed.len() > MINED_TX_THRESHOLD
    }
}
