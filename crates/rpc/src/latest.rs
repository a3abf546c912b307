use std::sync::Arc;

use relay_channel::AnnouncementChannel;
use relay_types::{ContentId, FilterHandle, Result};
use tokio::sync::Mutex;
use tracing::debug;

/// Most recently observed announcement payload, shared by all requests.
///
/// `advance` holds the lock across the poll, the overwrite and the read-back,
/// so two concurrent callers never interleave: the second one polls only
/// after the first has published its result. Resolving the returned id
/// against the store happens outside the lock.
#[derive(Clone, Default)]
pub struct LatestCell {
    inner: Arc<Mutex<Option<ContentId>>>,
}

impl LatestCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<ContentId> {
        self.inner.lock().await.clone()
    }

    /// Poll `filter` and remember the newest payload, if any arrived.
    ///
    /// Older payloads from the same batch are dropped. Returns whatever id is
    /// current after the update, which is `None` until the first announcement.
    pub async fn advance(
        &self,
        channel: &dyn AnnouncementChannel,
        filter: &FilterHandle,
    ) -> Result<Option<ContentId>> {
        let mut guard = self.inner.lock().await;
        let mut received = channel.poll(filter).await?;

        if let Some(newest) = received.pop() {
            if !received.is_empty() {
                debug!(
                    "Skipping {} older announcement(s) in favour of {}",
                    received.len(),
                    newest.payload
                );
            }
            *guard = Some(newest.payload);
        }

        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_channel::MemoryChannel;
    use relay_types::{Announcement, KeyId, PublicKey, ReceivedAnnouncement, Topic, WorkParams};
    use tokio::task::JoinSet;

    const PUBKEY: &str = "0x0476a7fe325709fe6420b216d7fb3bea263b012f44bfd5a00a1c7e125f0cfe2b220d6d1a6e5f0ed87ef39953d4a19969cf7d100cd52546b0a970ae0956001b83ce";

    async fn setup() -> (MemoryChannel, FilterHandle) {
        let key_id = KeyId::parse("20b637d3d40cb74875765250e8ad693aceed234b500c02adec0e279f4daaf49a").unwrap();
        let channel = MemoryChannel::with_key(key_id.clone(), PublicKey::from_hex(PUBKEY).unwrap());
        let filter = channel
            .create_filter(Topic::from_hex("0x12345678").unwrap(), &key_id)
            .await
            .unwrap();
        (channel, filter)
    }

    async fn announce(channel: &MemoryChannel, id: &str) {
        channel
            .publish(&Announcement {
                payload: ContentId::parse(id).unwrap(),
                recipient_public_key: PublicKey::from_hex(PUBKEY).unwrap(),
                topic: Topic::from_hex("0x12345678").unwrap(),
                work: WorkParams::default(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_until_first_announcement() {
        let (channel, filter) = setup().await;
        let cell = LatestCell::new();

        assert_eq!(cell.advance(&channel, &filter).await.unwrap(), None);
        assert_eq!(cell.current().await, None);
    }

    #[tokio::test]
    async fn test_keeps_newest_of_batch() {
        let (channel, filter) = setup().await;
        let cell = LatestCell::new();

        announce(&channel, "QmOld").await;
        announce(&channel, "QmNew").await;

        let latest = cell.advance(&channel, &filter).await.unwrap();
        assert_eq!(latest.unwrap().as_str(), "QmNew");
    }

    #[tokio::test]
    async fn test_sticky_without_new_messages() {
        let (channel, filter) = setup().await;
        let cell = LatestCell::new();

        announce(&channel, "QmOnly").await;
        cell.advance(&channel, &filter).await.unwrap();

        let again = cell.advance(&channel, &filter).await.unwrap();
        assert_eq!(again.unwrap().as_str(), "QmOnly");
    }

    #[tokio::test]
    async fn test_shared_between_clones() {
        let (channel, filter) = setup().await;
        let cell = LatestCell::new();
        let other = cell.clone();

        announce(&channel, "QmShared").await;
        cell.advance(&channel, &filter).await.unwrap();

        assert_eq!(other.current().await.unwrap().as_str(), "QmShared");
    }

    /// Records every delivered payload and how many polls overlap.
    #[derive(Default)]
    struct RecordingChannel {
        inner: MemoryChannel,
        delivered: std::sync::Mutex<Vec<ContentId>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl AnnouncementChannel for RecordingChannel {
        async fn create_filter(&self, topic: Topic, key_id: &KeyId) -> Result<FilterHandle> {
            self.inner.create_filter(topic, key_id).await
        }

        async fn publish(&self, announcement: &Announcement) -> Result<()> {
            self.inner.publish(announcement).await
        }

        async fn poll(&self, filter: &FilterHandle) -> Result<Vec<ReceivedAnnouncement>> {
            let overlapping = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(overlapping, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;

            let received = self.inner.poll(filter).await;
            if let Ok(batch) = &received {
                let mut delivered = self.delivered.lock().unwrap();
                delivered.extend(batch.iter().map(|message| message.payload.clone()));
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            received
        }

        fn transport(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_advance_is_serialized() {
        const ANNOUNCEMENTS: usize = 20;
        const CALLERS: usize = 16;

        let key_id = KeyId::parse("20b637d3d40cb74875765250e8ad693aceed234b500c02adec0e279f4daaf49a").unwrap();
        let channel = Arc::new(RecordingChannel {
            inner: MemoryChannel::with_key(key_id.clone(), PublicKey::from_hex(PUBKEY).unwrap()),
            ..Default::default()
        });
        let filter = channel
            .create_filter(Topic::from_hex("0x12345678").unwrap(), &key_id)
            .await
            .unwrap();
        let cell = LatestCell::new();

        let ids: Vec<String> = (0..ANNOUNCEMENTS).map(|n| format!("QmSeq{n}")).collect();
        announce(&channel.inner, &ids[0]).await;

        let mut tasks = JoinSet::new();
        {
            let channel = Arc::clone(&channel);
            let ids = ids.clone();
            tasks.spawn(async move {
                for id in &ids[1..] {
                    announce(&channel.inner, id).await;
                    tokio::task::yield_now().await;
                }
                None
            });
        }
        for _ in 0..CALLERS {
            let channel = Arc::clone(&channel);
            let filter = filter.clone();
            let cell = cell.clone();
            tasks.spawn(async move { Some(cell.advance(channel.as_ref(), &filter).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(result) = joined.unwrap() {
                assert!(result.unwrap().is_some());
            }
        }

        let last = cell.advance(channel.as_ref(), &filter).await.unwrap();
        assert_eq!(last.unwrap().as_str(), ids[ANNOUNCEMENTS - 1]);
        assert_eq!(cell.current().await.unwrap().as_str(), ids[ANNOUNCEMENTS - 1]);

        assert_eq!(channel.max_in_flight.load(Ordering::SeqCst), 1);
        let delivered: Vec<String> = channel
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();
        assert_eq!(delivered, ids);
    }
}
