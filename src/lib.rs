pub mod blockfeed;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod kinematics;
pub mod mined;
pub mod publish;
pub mod recommend;
pub mod rpc;
pub mod service;
pub mod snapshot;
pub mod window;

pub use config::{Config, Constants};
pub use engine::{Estimator, EstimatorConfig, EstimatorStats, Output};
pub use error::FeewatchError;
pub use kinematics::{FeeEstimate, TargetLane};
pub use mined::MinedSummary;
pub use publish::{Publisher, TOPIC_FEE_DIFF, TOPIC_MINED_SUMMARY, TOPIC_MIN_DIFF};
pub use recommend::{FeeDiffEntry, Recommendation};
pub use rpc::MempoolRpc;
pub use service::FeeService;
pub use snapshot::{MempoolSnapshot, MempoolTx, RawMempoolEntry};
