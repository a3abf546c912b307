//! Whisper (`shh_*`) JSON-RPC client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use relay_types::{
    Announcement, ContentId, FilterHandle, KeyId, ReceivedAnnouncement, RelayError, Result, Topic,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::AnnouncementChannel;

/// Client for a node exposing the Whisper RPC namespace.
pub struct WhisperChannel {
    endpoint: Url,
    http: Client,
    ttl_secs: u32,
    next_id: AtomicU64,
}

impl WhisperChannel {
    /// Create a client for the JSON-RPC endpoint at `rpc_url`.
    ///
    /// `ttl_secs` is the time-to-live attached to every posted envelope.
    pub fn new(rpc_url: impl AsRef<str>, ttl_secs: u32, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(rpc_url.as_ref()).map_err(|e| {
            RelayError::invalid(format!("invalid RPC url {}: {e}", rpc_url.as_ref()))
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::channel(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint,
            http,
            ttl_secs,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call<T>(&self, method: &str, params: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::channel(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::channel(format!(
                "{method} rejected (status {status}): {}",
                body.trim()
            )));
        }

        let envelope = response
            .json::<RpcResponse<T>>()
            .await
            .map_err(|e| RelayError::channel(format!("invalid {method} response: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(RelayError::channel(format!(
                "{method} failed (code {}): {}",
                error.code, error.message
            )));
        }

        envelope
            .result
            .ok_or_else(|| RelayError::channel(format!("{method} returned no result")))
    }
}

#[async_trait]
impl AnnouncementChannel for WhisperChannel {
    async fn create_filter(&self, topic: Topic, key_id: &KeyId) -> Result<FilterHandle> {
        let params = json!([{
            "topics": [topic.to_hex()],
            "privateKeyID": key_id.as_str(),
        }]);
        let filter_id: String = self.call("shh_newMessageFilter", params).await?;
        debug!("Whisper filter {} created for topic {}", filter_id, topic);
        Ok(FilterHandle::new(filter_id))
    }

    async fn publish(&self, announcement: &Announcement) -> Result<()> {
        let params = json!([{
            "pubKey": announcement.recipient_public_key.to_hex(),
            "topic": announcement.topic.to_hex(),
            "payload": announcement.payload_hex(),
            "powTarget": announcement.work.target,
            "powTime": announcement.work.time_secs,
            "ttl": self.ttl_secs,
        }]);

        // Older nodes answer `true`, newer ones the envelope hash.
        let result: Value = self.call("shh_post", params).await?;
        match result {
            Value::Bool(false) => Err(RelayError::channel("shh_post refused the message")),
            other => {
                debug!("shh_post accepted {}: {}", announcement.payload, other);
                Ok(())
            }
        }
    }

    async fn poll(&self, filter: &FilterHandle) -> Result<Vec<ReceivedAnnouncement>> {
        let messages: Vec<WhisperMessage> = self
            .call("shh_getFilterMessages", json!([filter.as_str()]))
            .await?;

        let mut received = Vec::with_capacity(messages.len());
        for message in messages {
            let payload = match ContentId::from_payload_hex(&message.payload) {
                Ok(id) => id,
                Err(err) => {
                    warn!("Skipping undecodable payload on filter {}: {}", filter, err);
                    continue;
                }
            };
            let topic = match Topic::from_hex(&message.topic) {
                Ok(topic) => topic,
                Err(err) => {
                    warn!("Skipping message with bad topic on filter {}: {}", filter, err);
                    continue;
                }
            };
            received.push(ReceivedAnnouncement {
                payload,
                topic,
                timestamp: message.timestamp,
                hash: message.hash,
            });
        }

        Ok(received)
    }

    fn transport(&self) -> &'static str {
        "whisper"
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhisperMessage {
    payload: String,
    topic: String,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    hash: Option<String>,
}
