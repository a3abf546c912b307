//! Content identifiers returned by the content store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Longest identifier accepted from a store or a payload.
pub const MAX_CONTENT_ID_LEN: usize = 128;

/// Opaque content address of a stored document.
///
/// Identifiers are produced by the backing store (a CID for IPFS, a BLAKE3
/// digest for the in-memory store) and are always plain ASCII alphanumerics,
/// which keeps them safe to embed in URL paths and announcement payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Validate and wrap an identifier string.
    pub fn parse(value: &str) -> Result<Self, RelayError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RelayError::invalid("content id must not be empty"));
        }
        if value.len() > MAX_CONTENT_ID_LEN {
            return Err(RelayError::invalid(format!(
                "content id too long ({} > {MAX_CONTENT_ID_LEN})",
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RelayError::invalid(format!(
                "content id {value:?} contains non-alphanumeric characters"
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Content address derived from BLAKE3 over the given bytes.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex form carried in an announcement payload (`0x` + hex of the UTF-8 bytes).
    pub fn to_payload_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }

    /// Decode an announcement payload back into an identifier.
    pub fn from_payload_hex(payload: &str) -> Result<Self, RelayError> {
        let normalized = payload
            .strip_prefix("0x")
            .or_else(|| payload.strip_prefix("0X"))
            .unwrap_or(payload)
            .trim();
        let bytes = hex::decode(normalized)
            .map_err(|e| RelayError::invalid(format!("payload is not hex: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| RelayError::invalid(format!("payload is not UTF-8: {e}")))?;
        Self::parse(&text)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}
