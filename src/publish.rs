use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::WampConfig;
use crate::error::FeewatchError;

pub const TOPIC_MINED_SUMMARY: &str = "com.fee.minedtxssummary";
pub const TOPIC_FEE_DIFF: &str = "com.fee.feediff";
pub const TOPIC_MIN_DIFF: &str = "com.fee.mindiff";

/// Last-value pub/sub egress. Publishes are best-effort; each message on a
/// topic supersedes the previous one.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;
}

// WAMP basic-profile message codes.
const WAMP_HELLO: u64 = 1;
const WAMP_WELCOME: u64 = 2;
const WAMP_ABORT: u64 = 3;
const WAMP_PUBLISH: u64 = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WAMP-over-WebSocket publisher (JSON serialization, publisher role only).
pub struct WampPublisher {
    stream: Mutex<WsStream>,
    request_id: AtomicU64,
}

impl WampPublisher {
    /// Connects, announces the publisher role on the configured realm, and
    /// waits for the router's welcome.
    pub async fn connect(cfg: &WampConfig) -> Result<Self> {
        let mut request = cfg
            .url
            .as_str()
            .into_client_request()
            .context("invalid wamp url")?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("wamp.2.json"),
        );

        let (mut stream, _) = connect_async(request)
            .await
            .map_err(|e| FeewatchError::Transport(format!("wamp connect: {}", e)))?;

        let hello = json!([WAMP_HELLO, cfg.realm, { "roles": { "publisher": {} } }]);
        stream
            .send(Message::Text(hello.to_string()))
            .await
            .map_err(|e| FeewatchError::Transport(format!("wamp hello: {}", e)))?;

        while let Some(message) = stream.next().await {
            let message =
                message.map_err(|e| FeewatchError::Transport(format!("wamp handshake: {}", e)))?;
            let Message::Text(text) = message else {
                continue;
            };
            let frame: Value = serde_json::from_str(&text)
                .map_err(|e| FeewatchError::Transport(format!("wamp frame: {}", e)))?;
            match frame.get(0).and_then(Value::as_u64) {
                Some(WAMP_WELCOME) => {
                    info!(realm = %cfg.realm, "wamp session established");
                    return Ok(Self {
                        stream: Mutex::new(stream),
                        request_id: AtomicU64::new(1),
                    });
                }
                Some(WAMP_ABORT) => {
                    return Err(FeewatchError::Transport(format!("wamp abort: {}", text)).into())
                }
                _ => continue,
            }
        }
        Err(FeewatchError::Transport("wamp connection closed during handshake".to_string()).into())
    }
}

#[async_trait]
impl Publisher for WampPublisher {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let frame = json!([WAMP_PUBLISH, request_id, {}, topic, [payload]]);
        let mut stream = self.stream.lock().await;
        stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| FeewatchError::Transport(format!("wamp publish: {}", e)))?;
        debug!(topic, "published");
        Ok(())
    }
}
