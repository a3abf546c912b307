//! In-process announcement hub (for testing and single-node deployments).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_types::{
    Announcement, FilterHandle, KeyId, PublicKey, ReceivedAnnouncement, RelayError, Result, Topic,
};
use tracing::debug;

use crate::AnnouncementChannel;

/// Channel that delivers announcements to filters registered in the same process.
///
/// Key identities must be registered with their public key before a filter
/// can be created for them; a publish reaches every filter whose topic
/// matches and whose key identity owns the recipient key.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<MemoryChannelInner>,
}

#[derive(Default)]
struct MemoryChannelInner {
    keys: RwLock<HashMap<KeyId, PublicKey>>,
    filters: RwLock<HashMap<FilterHandle, FilterState>>,
    next_filter: AtomicU64,
    published: AtomicU64,
}

struct FilterState {
    topic: Topic,
    key_id: KeyId,
    queue: VecDeque<ReceivedAnnouncement>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel with a single key pair already registered.
    pub fn with_key(key_id: KeyId, public_key: PublicKey) -> Self {
        let channel = Self::new();
        channel.register_key(key_id, public_key);
        channel
    }

    pub fn register_key(&self, key_id: KeyId, public_key: PublicKey) {
        self.inner.keys.write().insert(key_id, public_key);
    }

    /// Total number of accepted publishes.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Messages waiting in a filter's queue.
    pub fn pending(&self, filter: &FilterHandle) -> usize {
        self.inner
            .filters
            .read()
            .get(filter)
            .map(|state| state.queue.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl AnnouncementChannel for MemoryChannel {
    async fn create_filter(&self, topic: Topic, key_id: &KeyId) -> Result<FilterHandle> {
        if !self.inner.keys.read().contains_key(key_id) {
            return Err(RelayError::channel(format!("non-existent key ID {key_id}")));
        }

        let seq = self.inner.next_filter.fetch_add(1, Ordering::Relaxed);
        let handle = FilterHandle::new(format!("memory-filter-{seq}"));
        self.inner.filters.write().insert(
            handle.clone(),
            FilterState {
                topic,
                key_id: key_id.clone(),
                queue: VecDeque::new(),
            },
        );
        debug!("Created filter {} on topic {}", handle, topic);
        Ok(handle)
    }

    async fn publish(&self, announcement: &Announcement) -> Result<()> {
        announcement
            .work
            .validate()
            .map_err(|e| RelayError::channel(format!("message rejected: {e}")))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let seq = self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut envelope = blake3::Hasher::new();
        envelope.update(announcement.topic.as_bytes());
        envelope.update(announcement.payload.as_str().as_bytes());
        envelope.update(&seq.to_le_bytes());
        let hash = format!("0x{}", envelope.finalize().to_hex());

        let owners: Vec<KeyId> = self
            .inner
            .keys
            .read()
            .iter()
            .filter(|(_, key)| **key == announcement.recipient_public_key)
            .map(|(id, _)| id.clone())
            .collect();

        let mut delivered = 0usize;
        {
            let mut filters = self.inner.filters.write();
            for state in filters.values_mut() {
                if state.topic == announcement.topic && owners.contains(&state.key_id) {
                    state.queue.push_back(ReceivedAnnouncement {
                        payload: announcement.payload.clone(),
                        topic: announcement.topic,
                        timestamp: Some(timestamp),
                        hash: Some(hash.clone()),
                    });
                    delivered += 1;
                }
            }
        }

        debug!(
            "Published {} on topic {} to {} filter(s)",
            announcement.payload, announcement.topic, delivered
        );
        Ok(())
    }

    async fn poll(&self, filter: &FilterHandle) -> Result<Vec<ReceivedAnnouncement>> {
        let mut filters = self.inner.filters.write();
        let state = filters
            .get_mut(filter)
            .ok_or_else(|| RelayError::channel(format!("filter {filter} not found")))?;
        Ok(state.queue.drain(..).collect())
    }

    fn transport(&self) -> &'static str {
        "memory"
    }
}
