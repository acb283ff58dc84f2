use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use crate::config::RpcConfig;
use crate::error::FeewatchError;

/// Pull-side port for the node's mempool.
#[async_trait]
pub trait MempoolRpc: Send + Sync {
    /// Fetches the raw mempool keyed by txid, fields unparsed.
    async fn raw_mempool(&self) -> Result<HashMap<String, Value>>;
}

/// JSON-RPC client for a Bitcoin node.
pub struct BitcoindRpc {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl BitcoindRpc {
    pub fn new(cfg: &RpcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("building RPC client")?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "feewatch",
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| FeewatchError::Transport(format!("{}: {}", method, e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeewatchError::Transport(format!("{}: {}", method, e)))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(FeewatchError::Transport(format!("{}: {}", method, error)).into());
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl MempoolRpc for BitcoindRpc {
    async fn raw_mempool(&self) -> Result<HashMap<String, Value>> {
        let result = self.call("getrawmempool", json!([true])).await?;
        let entries: HashMap<String, Value> =
            serde_json::from_value(result).context("unexpected getrawmempool shape")?;
        trace!(entries = entries.len(), "raw mempool fetched");
        Ok(entries)
    }
}
