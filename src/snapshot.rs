use std::collections::HashMap;

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FeewatchError;

/// A raw mempool entry as returned by `getrawmempool` in verbose mode.
///
/// Both the `descendant…` spelling used by current nodes and the legacy
/// `descendent…` spelling are accepted; additional fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMempoolEntry {
    #[serde(alias = "vsize")]
    pub size: u64,
    pub fee: u64,
    #[serde(rename = "descendantsize", alias = "descendentsize")]
    pub descendant_size: u64,
    #[serde(rename = "descendantfees", alias = "descendentfees")]
    pub descendant_fees: u64,
}

/// A mempool transaction with its derived packing coordinates.
///
/// `fee_rate` is the package fee rate (descendant fees over descendant
/// size), `cum_size` the cumulative size up to and including this entry in
/// fee-rate-descending order, and `target_block` the hypothetical block the
/// entry lands in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolTx {
    pub txid: Txid,
    pub size: u64,
    pub fee: u64,
    pub descendant_size: u64,
    pub descendant_fees: u64,
    pub fee_rate: f64,
    pub cum_size: u64,
    pub target_block: u32,
}

/// The mempool packed into fee-ordered hypothetical blocks.
///
/// Invariants: `cum_size` is the prefix sum of `size` in fee-rate-descending
/// order, `fee_rate` is non-increasing, and `target_block` is non-decreasing
/// with steps of at most one.
#[derive(Debug, Clone)]
pub struct MempoolSnapshot {
    pub txs: Vec<MempoolTx>,
    pub taken_at: DateTime<Utc>,
}

fn parse_entry(txid: &str, value: Value) -> Result<(Txid, RawMempoolEntry), FeewatchError> {
    let txid: Txid = txid
        .parse()
        .map_err(|e| FeewatchError::Parse(format!("txid {}: {}", txid, e)))?;
    let entry: RawMempoolEntry = serde_json::from_value(value)
        .map_err(|e| FeewatchError::Parse(format!("entry {}: {}", txid, e)))?;
    Ok((txid, entry))
}

impl MempoolSnapshot {
    /// Packs a raw mempool into a sorted snapshot.
    ///
    /// Entries that fail to parse or produce a non-finite fee rate are
    /// skipped; the second return value counts them.
    pub fn pack(
        raw: HashMap<String, Value>,
        block_effective_size: u64,
        taken_at: DateTime<Utc>,
    ) -> (Self, usize) {
        let mut skipped = 0usize;
        let mut txs: Vec<MempoolTx> = Vec::with_capacity(raw.len());

        for (txid, value) in raw {
            let (txid, entry) = match parse_entry(&txid, value) {
                Ok(parsed) => parsed,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            if entry.descendant_size == 0 {
                skipped += 1;
                continue;
            }
            let fee_rate = entry.descendant_fees as f64 / entry.descendant_size as f64;
            if !fee_rate.is_finite() {
                skipped += 1;
                continue;
            }
            txs.push(MempoolTx {
                txid,
                size: entry.size,
                fee: entry.fee,
                descendant_size: entry.descendant_size,
                descendant_fees: entry.descendant_fees,
                fee_rate,
                cum_size: 0,
                target_block: 1,
            });
        }

        // Descending package fee rate, txid order on ties so equal-rate
        // snapshots pack identically across polls.
        txs.sort_unstable_by(|a, b| {
            b.fee_rate
                .total_cmp(&a.fee_rate)
                .then_with(|| a.txid.cmp(&b.txid))
        });

        let mut cum = 0u64;
        let mut target = 1u32;
        let mut n = 1u64;
        for (i, tx) in txs.iter_mut().enumerate() {
            cum += tx.size;
            // A crossing tx opens the next hypothetical block. The head tx
            // stays in block 1 even when it is larger than one block.
            if i > 0 && cum > n * block_effective_size {
                target += 1;
                n += 1;
            }
            tx.cum_size = cum;
            tx.target_block = target;
        }

        (Self { txs, taken_at }, skipped)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Structural equality, ignoring the capture time. Used to suppress
    /// redundant downstream recomputation during quiet periods.
    pub fn same_contents(&self, other: &Self) -> bool {
        self.txs == other.txs
    }

    /// The size coordinate of the boundary between `target` and the next
    /// hypothetical block: the `cum_size` of the first transaction assigned
    /// to `target + 1`, if any.
    pub fn final_position(&self, target: u32) -> Option<u64> {
        self.txs
            .iter()
            .find(|tx| tx.target_block == target + 1)
            .map(|tx| tx.cum_size)
    }

    /// The transaction whose `cum_size` is closest to `position`. Ties go to
    /// the higher fee rate, then txid order.
    pub fn closest_to(&self, position: f64) -> Option<&MempoolTx> {
        self.txs.iter().min_by(|a, b| {
            let da = (a.cum_size as f64 - position).abs();
            let db = (b.cum_size as f64 - position).abs();
            da.total_cmp(&db)
                .then(b.fee_rate.total_cmp(&a.fee_rate))
                .then_with(|| a.txid.cmp(&b.txid))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(size: u64, fee: u64, descendant_size: u64, descendant_fees: u64) -> Value {
        json!({
            "size": size,
            "fee": fee,
            "descendantsize": descendant_size,
            "descendantfees": descendant_fees,
        })
    }

    fn txid_hex(i: u32) -> String {
        format!("{:064x}", i)
    }

    fn pack(raw: Vec<(String, Value)>, effective: u64) -> MempoolSnapshot {
        let (snapshot, skipped) =
            MempoolSnapshot::pack(raw.into_iter().collect(), effective, Utc::now());
        assert_eq!(skipped, 0);
        snapshot
    }

    #[test]
    fn test_packing_boundary() {
        // Three txs of descending fee rate crossing a 1 MB effective block.
        let raw = vec![
            (txid_hex(1), entry(600_000, 100, 600_000, 3_000_000)),
            (txid_hex(2), entry(500_000, 100, 500_000, 1_000_000)),
            (txid_hex(3), entry(100_000, 100, 100_000, 100_000)),
        ];
        let snapshot = pack(raw, 1_000_000);
        let cum: Vec<u64> = snapshot.txs.iter().map(|tx| tx.cum_size).collect();
        let targets: Vec<u32> = snapshot.txs.iter().map(|tx| tx.target_block).collect();
        assert_eq!(cum, vec![600_000, 1_100_000, 1_200_000]);
        assert_eq!(targets, vec![1, 2, 2]);
    }

    #[test]
    fn test_oversized_head_tx_stays_in_first_block() {
        let raw = vec![(txid_hex(1), entry(1_500_000, 100, 1_500_000, 1_500_000))];
        let snapshot = pack(raw, 1_000_000);
        assert_eq!(snapshot.txs[0].target_block, 1);
    }

    #[test]
    fn test_packing_invariants() {
        let raw: Vec<(String, Value)> = (0..50)
            .map(|i| {
                (
                    txid_hex(i),
                    entry(40_000 + (i as u64) * 1_000, 100, 50_000, 5_000_000 - (i as u64) * 17),
                )
            })
            .collect();
        let snapshot = pack(raw, 300_000);

        let mut cum = 0u64;
        for pair in snapshot.txs.windows(2) {
            assert!(pair[0].fee_rate >= pair[1].fee_rate);
            assert!(pair[0].cum_size <= pair[1].cum_size);
            let step = pair[1].target_block - pair[0].target_block;
            assert!(step <= 1);
        }
        for tx in &snapshot.txs {
            cum += tx.size;
            assert_eq!(tx.cum_size, cum);
        }
    }

    #[test]
    fn test_equal_fee_rates_pack_deterministically() {
        let raw = vec![
            (txid_hex(7), entry(1_000, 10, 1_000, 500)),
            (txid_hex(3), entry(1_000, 10, 1_000, 500)),
            (txid_hex(5), entry(1_000, 10, 1_000, 500)),
        ];
        let a = pack(raw.clone(), 1_000_000);
        let b = pack(raw, 1_000_000);
        assert!(a.same_contents(&b));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let mut raw = HashMap::new();
        raw.insert(txid_hex(1), entry(1_000, 10, 1_000, 500));
        raw.insert("not-a-txid".to_string(), entry(1_000, 10, 1_000, 500));
        raw.insert(txid_hex(2), json!({ "size": 1_000 }));
        raw.insert(txid_hex(3), entry(1_000, 10, 0, 500));
        let (snapshot, skipped) = MempoolSnapshot::pack(raw, 1_000_000, Utc::now());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(skipped, 3);
    }

    #[test]
    fn test_accepts_both_descendant_spellings() {
        let mut raw = HashMap::new();
        raw.insert(
            txid_hex(1),
            json!({ "size": 500, "fee": 10, "descendantsize": 1000, "descendantfees": 2000 }),
        );
        raw.insert(
            txid_hex(2),
            json!({ "size": 500, "fee": 10, "descendentsize": 1000, "descendentfees": 1000 }),
        );
        let (snapshot, skipped) = MempoolSnapshot::pack(raw, 1_000_000, Utc::now());
        assert_eq!(skipped, 0);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.txs[0].fee_rate, 2.0);
        assert_eq!(snapshot.txs[1].fee_rate, 1.0);
    }

    #[test]
    fn test_final_position() {
        let raw = vec![
            (txid_hex(1), entry(600_000, 100, 600_000, 3_000_000)),
            (txid_hex(2), entry(500_000, 100, 500_000, 1_000_000)),
            (txid_hex(3), entry(100_000, 100, 100_000, 100_000)),
        ];
        let snapshot = pack(raw, 1_000_000);
        assert_eq!(snapshot.final_position(1), Some(1_100_000));
        assert_eq!(snapshot.final_position(2), None);
    }

    #[test]
    fn test_closest_to_prefers_higher_fee_rate_on_ties() {
        let raw = vec![
            (txid_hex(1), entry(1_000, 10, 1_000, 3_000)),
            (txid_hex(2), entry(1_000, 10, 1_000, 2_000)),
        ];
        let snapshot = pack(raw, 1_000_000);
        // cum sizes 1000 and 2000; position 1500 is equidistant.
        let tx = snapshot.closest_to(1_500.0).unwrap();
        assert_eq!(tx.fee_rate, 3.0);
    }
}
