use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use feewatch::config::Config;
use feewatch::engine::{Estimator, EstimatorConfig, Output};
use feewatch::error::FeewatchError;
use feewatch::publish::Publisher;
use feewatch::rpc::MempoolRpc;
use feewatch::service::FeeService;
use feewatch::snapshot::MempoolSnapshot;

const EFFECTIVE: u64 = 1_000_000;

fn config() -> EstimatorConfig {
    EstimatorConfig {
        block_effective_size: EFFECTIVE,
        targets: (1..=4).collect(),
        added_window_ms: 600_000,
        removed_window_blocks: 3,
        min_savings_rate: 0.01,
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn entry(size: u64, descendant_size: u64, descendant_fees: u64) -> Value {
    json!({
        "size": size,
        "fee": 100,
        "descendantsize": descendant_size,
        "descendantfees": descendant_fees,
    })
}

fn raw_map(ids: impl Iterator<Item = u64>, entry_for: impl Fn(u64) -> Value) -> HashMap<String, Value> {
    ids.map(|i| (format!("{:064x}", i), entry_for(i))).collect()
}

fn snapshot(raw: HashMap<String, Value>, at: DateTime<Utc>) -> MempoolSnapshot {
    let (snapshot, skipped) = MempoolSnapshot::pack(raw, EFFECTIVE, at);
    assert_eq!(skipped, 0);
    snapshot
}

#[test]
fn test_quiet_mempool_emits_nothing() {
    let mut engine = Estimator::new(config());
    let quiet = || raw_map(0..3, |_| entry(1_000, 1_000, 500));

    let out = engine.on_raw_mempool(quiet(), base_time());
    assert!(out.is_empty());

    // The identical follow-up snapshot is deduplicated away.
    let out = engine.on_raw_mempool(quiet(), base_time() + Duration::seconds(10));
    assert!(out.is_empty());

    assert_eq!(engine.stats().polls, 2);
    assert_eq!(engine.stats().snapshots, 1);
    assert_eq!(engine.stats().duplicates, 1);
}

#[test]
fn test_empty_mempool_stays_silent() {
    let mut engine = Estimator::new(config());
    let t0 = base_time();

    assert!(engine.on_raw_mempool(HashMap::new(), t0).is_empty());
    assert_eq!(engine.on_block(t0), None);
    assert_eq!(engine.on_block(t0 + Duration::minutes(10)), Some(600_000));
    assert!(engine
        .commit_removed_window(600_000, t0 + Duration::minutes(10))
        .is_empty());
    assert!(engine
        .on_raw_mempool(HashMap::new(), t0 + Duration::minutes(11))
        .is_empty());
    assert_eq!(engine.stats().emissions, 0);
}

#[test]
fn test_mined_block_summary() {
    let mut engine = Estimator::new(config());
    let t0 = base_time();

    // Two notifications establish a nine-minute inter-block interval.
    assert_eq!(engine.on_block(t0), None);
    assert_eq!(
        engine.on_block(t0 + Duration::minutes(9)),
        Some(540_000)
    );

    // Fee rates descend with the txid index: (1000 - i) / 1000.
    let full = raw_map(0..1_000, |i| entry(1_000, 1_000, 1_000 - i));
    let after = raw_map(0..200, |i| entry(1_000, 1_000, 1_000 - i));

    let t1 = t0 + Duration::minutes(10);
    assert!(engine.on_snapshot(snapshot(full, t1)).is_empty());

    let outputs = engine.on_snapshot(snapshot(after, t1 + Duration::seconds(10)));
    let summary = outputs
        .iter()
        .find_map(|out| match out {
            Output::Mined(summary) => Some(summary),
            _ => None,
        })
        .expect("mined summary");

    assert_eq!(summary.txs, 800);
    assert_eq!(summary.ibi, 9.0);
    assert_eq!(summary.block_size, 0.8);
    // The cheapest removed tx had descendant fees of 1.
    assert_eq!(summary.min_fee_tx.fee_rate, 0.001);
    assert_eq!(summary.fee["0.001"], 0.001);
    // Cheapest 40% of the 800 removed: rates 0.001..=0.320.
    assert!((summary.fee["0.4"] - 0.1605).abs() < 1e-9);
    assert_eq!(engine.stats().mined_events, 1);
}

#[test]
fn test_mined_block_without_interval_is_suppressed() {
    let mut engine = Estimator::new(config());
    let t0 = base_time();

    let full = raw_map(0..1_000, |i| entry(1_000, 1_000, 1_000 - i));
    let after = raw_map(0..200, |i| entry(1_000, 1_000, 1_000 - i));

    engine.on_snapshot(snapshot(full, t0));
    let outputs = engine.on_snapshot(snapshot(after, t0 + Duration::seconds(10)));
    assert!(outputs.is_empty());
    assert_eq!(engine.stats().mined_events, 1);
}

#[test]
fn test_estimates_flow_into_fee_curve() {
    let mut engine = Estimator::new(config());
    let t0 = base_time();

    // Ten half-megabyte txs spanning five hypothetical blocks, fee rates
    // 100, 99, ... descending.
    let deep = |i: u64| entry(500_000, 500_000, 500_000 * (100 - i));
    let s0 = raw_map(0..10, deep);
    assert!(engine.on_snapshot(snapshot(s0.clone(), t0)).is_empty());

    // Two mid-rate arrivals feed the added window.
    let mut s1 = s0.clone();
    s1.insert(
        format!("{:064x}", 500),
        json!({ "size": 100_000, "fee": 100, "descendantsize": 100_000, "descendantfees": 9_550_000 }),
    );
    s1.insert(
        format!("{:064x}", 501),
        json!({ "size": 100_000, "fee": 100, "descendantsize": 100_000, "descendantfees": 9_450_000 }),
    );
    let t1 = t0 + Duration::seconds(10);
    assert!(engine.on_snapshot(snapshot(s1.clone(), t1)).is_empty());

    assert_eq!(engine.on_block(t0), None);
    assert_eq!(engine.on_block(t0 + Duration::minutes(10)), Some(600_000));

    // The two highest-rate txs leave the mempool.
    let mut s2 = s1.clone();
    s2.remove(&format!("{:064x}", 0));
    s2.remove(&format!("{:064x}", 1));
    let t2 = t1 + Duration::seconds(10);
    assert!(engine.on_snapshot(snapshot(s2, t2)).is_empty());

    // Committing the removed window completes every velocity pair.
    let outputs = engine.commit_removed_window(600_000, t2 + Duration::seconds(5));
    assert_eq!(outputs.len(), 2);

    let retained = outputs
        .iter()
        .find_map(|out| match out {
            Output::FeeDiffs(retained) => Some(retained),
            _ => None,
        })
        .expect("fee diff emission");
    assert_eq!(retained[0].target_block, 1);
    assert_eq!(retained[0].diff, 0.0);
    assert!(retained.iter().all(|e| e.diff <= 0.0));

    let ranked = outputs
        .iter()
        .find_map(|out| match out {
            Output::Recommendations(ranked) => Some(ranked),
            _ => None,
        })
        .expect("recommendation emission");
    assert!(ranked.iter().all(|r| r.valid));
    for pair in ranked.windows(2) {
        assert!(pair[0].cost() <= pair[1].cost());
    }
    assert_eq!(engine.stats().emissions, 1);

    // Nothing moved, so nothing is republished.
    let t3 = t2 + Duration::seconds(10);
    // (a fresh poll with the same contents ages the windows only)
    let s2_again = {
        let mut raw = s1;
        raw.remove(&format!("{:064x}", 0));
        raw.remove(&format!("{:064x}", 1));
        raw
    };
    let outputs = engine.on_snapshot(snapshot(s2_again, t3));
    assert!(outputs.is_empty());
}

struct FailingRpc;

#[async_trait]
impl MempoolRpc for FailingRpc {
    async fn raw_mempool(&self) -> Result<HashMap<String, Value>> {
        Err(FeewatchError::Transport("connection refused".to_string()).into())
    }
}

struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, _topic: &str, _payload: Value) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_rpc_failure_surfaces_to_supervisor() {
    let mut config = Config::default();
    config.constants.time_res = 10;
    config.zmq_socket.url = "tcp://127.0.0.1:1".to_string();
    config.zmq_socket.reconnect_delay_ms = 10_000;

    let service = FeeService::with_ports(config, Arc::new(FailingRpc), Arc::new(NullPublisher));
    let result = tokio::time::timeout(StdDuration::from_secs(5), service.run())
        .await
        .expect("pipeline should fail fast on RPC errors");
    assert!(result.is_err());
}
