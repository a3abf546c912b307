//! Content store backed by the IPFS HTTP API (`/api/v0/add`, `/api/v0/cat`).

use std::time::Duration;

use async_trait::async_trait;
use relay_types::{ContentId, Document, RelayError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::ContentStore;

/// Error fragments the IPFS daemon uses for unknown or unresolvable objects.
const NOT_FOUND_MARKERS: [&str; 5] = [
    "not found",
    "invalid path",
    "invalid cid",
    "no link named",
    "failed to resolve",
];

/// HTTP client for an IPFS node's RPC API.
#[derive(Clone)]
pub struct IpfsContentStore {
    base_url: Url,
    http: Client,
}

impl IpfsContentStore {
    /// Create a client for the API at `api_url` (e.g. `http://127.0.0.1:5001`).
    pub fn new(api_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::store(format!("failed to build HTTP client: {e}")))?;
        Self::with_http_client(api_url, http)
    }

    /// Use an existing reqwest client.
    pub fn with_http_client(api_url: impl AsRef<str>, http: Client) -> Result<Self> {
        let mut url = Url::parse(api_url.as_ref()).map_err(|e| {
            RelayError::invalid(format!("invalid IPFS API url {}: {e}", api_url.as_ref()))
        })?;
        if !url.path().ends_with('/') {
            let mut path = url.path().trim_end_matches('/').to_owned();
            path.push('/');
            url.set_path(&path);
        }
        Ok(Self { base_url: url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RelayError::invalid(format!("invalid IPFS endpoint {path}: {e}")))
    }

    async fn read_api_error(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let bytes = response.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<IpfsErrorResponse>(&bytes)
            .map(|err| err.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
        (status, message)
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn put(&self, document: &Document) -> Result<ContentId> {
        let mut url = self.endpoint("api/v0/add")?;
        url.query_pairs_mut().append_pair("pin", "true");

        let part = Part::bytes(document.canonical_bytes())
            .file_name("document.json")
            .mime_str("application/json")
            .map_err(|e| RelayError::store(format!("failed to build upload: {e}")))?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::store(format!("IPFS add request failed: {e}")))?;

        if !response.status().is_success() {
            let (status, message) = Self::read_api_error(response).await;
            return Err(RelayError::store(format!(
                "IPFS add rejected (status {status}): {message}"
            )));
        }

        let added = response
            .json::<IpfsAddResponse>()
            .await
            .map_err(|e| RelayError::store(format!("invalid IPFS add response: {e}")))?;
        debug!("IPFS stored {} ({} bytes)", added.hash, added.size);

        ContentId::parse(&added.hash)
            .map_err(|e| RelayError::store(format!("IPFS returned unusable hash: {e}")))
    }

    async fn get(&self, id: &ContentId) -> Result<Document> {
        let mut url = self.endpoint("api/v0/cat")?;
        url.query_pairs_mut().append_pair("arg", id.as_str());

        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| RelayError::store(format!("IPFS cat request failed: {e}")))?;

        if !response.status().is_success() {
            let (status, message) = Self::read_api_error(response).await;
            let lowered = message.to_lowercase();
            if NOT_FOUND_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                return Err(RelayError::not_found(format!("{id}: {message}")));
            }
            warn!("IPFS cat for {} failed with status {}: {}", id, status, message);
            return Err(RelayError::store(format!(
                "IPFS cat rejected (status {status}): {message}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::store(format!("failed to read IPFS content: {e}")))?;
        Document::from_slice(&bytes)
    }

    fn backend(&self) -> &'static str {
        "ipfs"
    }
}

#[derive(Debug, Deserialize)]
struct IpfsAddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size", default)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct IpfsErrorResponse {
    #[serde(rename = "Message")]
    message: String,
}
