//! Announcement data model for the encrypted topic channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;
use crate::error::RelayError;

/// Four-byte topic identifier, written as `0x`-prefixed hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(pub [u8; 4]);

impl Topic {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(value: &str) -> Result<Self, RelayError> {
        let normalized = strip_hex_prefix(value);
        if normalized.len() != 8 {
            return Err(RelayError::invalid(format!(
                "topic hex must be 8 characters, got {}",
                normalized.len()
            )));
        }
        let mut arr = [0u8; 4];
        hex::decode_to_slice(normalized, &mut arr)
            .map_err(|e| RelayError::invalid(format!("invalid topic hex: {e}")))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Topic {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_hex()
    }
}

/// Recipient public key (uncompressed or compressed secp256k1 point).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_hex(value: &str) -> Result<Self, RelayError> {
        let bytes = hex::decode(strip_hex_prefix(value))
            .map_err(|e| RelayError::invalid(format!("invalid public key hex: {e}")))?;
        if bytes.len() != 33 && bytes.len() != 65 {
            return Err(RelayError::invalid(format!(
                "public key must be 33 or 65 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for PublicKey {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

/// Identity under which the transport holds a private key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    pub fn parse(value: &str) -> Result<Self, RelayError> {
        let normalized = strip_hex_prefix(value);
        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RelayError::invalid(format!(
                "key identity {value:?} must be non-empty hex"
            )));
        }
        Ok(Self(normalized.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KeyId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

/// Proof-of-work cost attached to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkParams {
    /// Minimal PoW target the message must reach.
    pub target: f64,
    /// Seconds the sender may spend computing the proof.
    pub time_secs: u32,
}

impl WorkParams {
    pub fn validate(&self) -> Result<(), RelayError> {
        if !self.target.is_finite() || self.target <= 0.0 {
            return Err(RelayError::invalid(format!(
                "work target must be positive, got {}",
                self.target
            )));
        }
        if self.time_secs == 0 {
            return Err(RelayError::invalid("work time must be at least one second"));
        }
        Ok(())
    }
}

impl Default for WorkParams {
    fn default() -> Self {
        Self {
            target: 12.5,
            time_secs: 10,
        }
    }
}

/// Outgoing announcement of a freshly stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub payload: ContentId,
    pub recipient_public_key: PublicKey,
    pub topic: Topic,
    pub work: WorkParams,
}

impl Announcement {
    /// Payload as it travels on the wire.
    pub fn payload_hex(&self) -> String {
        self.payload.to_payload_hex()
    }
}

/// Announcement observed by a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedAnnouncement {
    pub payload: ContentId,
    pub topic: Topic,
    /// Sender timestamp in seconds, when the transport reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Envelope hash, when the transport reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Subscription token returned by the transport for one topic and key identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterHandle(String);

impl FilterHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
