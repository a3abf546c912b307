//! Announcement channel clients.
//!
//! An announcement channel is an encrypted, topic-scoped publish/subscribe
//! transport. Publishing encrypts a payload for one recipient key and pays
//! a proof-of-work cost; subscribers register a filter once and poll it for
//! messages that arrived since the previous poll.

pub mod memory;
pub mod whisper;

use async_trait::async_trait;
use relay_types::{Announcement, FilterHandle, KeyId, ReceivedAnnouncement, Result, Topic};

pub use memory::MemoryChannel;
pub use whisper::WhisperChannel;

#[async_trait]
pub trait AnnouncementChannel: Send + Sync {
    /// Register interest in `topic` messages decryptable by `key_id`.
    async fn create_filter(&self, topic: Topic, key_id: &KeyId) -> Result<FilterHandle>;

    /// Encrypt the announcement payload for its recipient and inject it.
    async fn publish(&self, announcement: &Announcement) -> Result<()>;

    /// Messages matching the filter observed since the last poll, oldest first.
    ///
    /// Each call advances the filter cursor; a message is returned once.
    async fn poll(&self, filter: &FilterHandle) -> Result<Vec<ReceivedAnnouncement>>;

    /// Short transport label for logs and health output.
    fn transport(&self) -> &'static str;
}
