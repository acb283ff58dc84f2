use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level service configuration, loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc: RpcConfig,
    pub zmq_socket: ZmqConfig,
    pub wamp: WampConfig,
    pub constants: Constants,
}

/// Connection parameters for the node's JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Request timeout in milliseconds. Mempool fetches are a bounded wait.
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            user: "bitcoin".to_string(),
            password: String::new(),
            timeout_ms: 15_000,
        }
    }
}

/// Block-hash subscription endpoint and reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZmqConfig {
    pub url: String,
    /// Reconnection attempts before the feed surfaces a terminal error.
    pub max_reconnects: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for ZmqConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:28332".to_string(),
            max_reconnects: 5,
            reconnect_delay_ms: 2_000,
        }
    }
}

/// Pub/sub endpoint and namespace for published recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WampConfig {
    pub url: String,
    pub realm: String,
}

impl Default for WampConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            realm: "realm1".to_string(),
        }
    }
}

/// Estimation constants. Keys are camelCase in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Constants {
    /// Nominal block size, in the same size unit the node reports.
    pub block_size: u64,
    /// Fraction of each block reserved for miner-controlled content.
    pub miners_reserved_block_ratio: f64,
    /// Mempool polling period in milliseconds.
    pub time_res: u64,
    /// Trailing window for added-transaction velocity, in milliseconds.
    pub int_time_added: u64,
    /// Block events coalesced into the removed-transaction window.
    pub int_blocks_removed: usize,
    /// Minimum relative fee improvement for a target to count as valid.
    pub min_savings_rate: f64,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            block_size: 1_000_000,
            miners_reserved_block_ratio: 0.05,
            time_res: 10_000,
            int_time_added: 600_000,
            int_blocks_removed: 3,
            min_savings_rate: 0.01,
        }
    }
}

impl Constants {
    /// Portion of a block available to fee-paying transactions.
    pub fn block_effective_size(&self) -> u64 {
        (self.block_size as f64 * (1.0 - self.miners_reserved_block_ratio)) as u64
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path))?;
        let config: Self = toml::from_str(&contents).context("parsing config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.constants;
        if !(0.0..1.0).contains(&c.miners_reserved_block_ratio) {
            bail!(
                "minersReservedBlockRatio must be in [0, 1), got {}",
                c.miners_reserved_block_ratio
            );
        }
        if c.block_size == 0 || c.block_effective_size() == 0 {
            bail!("blockSize leaves no room for fee-paying transactions");
        }
        if c.time_res == 0 {
            bail!("timeRes must be positive");
        }
        if c.int_time_added == 0 {
            bail!("intTimeAdded must be positive");
        }
        if c.int_blocks_removed == 0 {
            bail!("intBlocksRemoved must be positive");
        }
        Ok(())
    }
}
