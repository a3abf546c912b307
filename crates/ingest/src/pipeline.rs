use std::sync::Arc;

use metrics::counter;
use relay_channel::AnnouncementChannel;
use relay_store::ContentStore;
use relay_types::{Announcement, ContentId, Document, PublicKey, Result, Topic, WorkParams};
use tracing::{debug, info};

/// Where and how every ingested document is announced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceTarget {
    pub topic: Topic,
    pub recipient_public_key: PublicKey,
    pub work: WorkParams,
}

impl AnnounceTarget {
    fn announcement_for(&self, content_id: ContentId) -> Announcement {
        Announcement {
            payload: content_id,
            recipient_public_key: self.recipient_public_key.clone(),
            topic: self.topic,
            work: self.work,
        }
    }
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub content_id: ContentId,
    /// Payload exactly as it was handed to the channel.
    pub payload_hex: String,
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn ContentStore>,
    channel: Arc<dyn AnnouncementChannel>,
    target: AnnounceTarget,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        channel: Arc<dyn AnnouncementChannel>,
        target: AnnounceTarget,
    ) -> Self {
        Self {
            store,
            channel,
            target,
        }
    }

    pub fn target(&self) -> &AnnounceTarget {
        &self.target
    }

    /// Normalize `raw`, store it, then announce the resulting content id.
    ///
    /// Nothing is published unless the store accepted the document. A publish
    /// failure after a successful put leaves the stored document unannounced.
    pub async fn ingest(&self, raw: &[u8]) -> Result<IngestReceipt> {
        let result = self.run(raw).await;
        match &result {
            Ok(_) => counter!("relay_ingest_documents_total").increment(1),
            Err(err) => counter!("relay_ingest_failures_total", "kind" => err.kind()).increment(1),
        }
        result
    }

    async fn run(&self, raw: &[u8]) -> Result<IngestReceipt> {
        let document = Document::normalize(raw)?;
        let content_id = self.store.put(&document).await?;
        debug!("Stored document {} via {}", content_id, self.store.backend());

        let announcement = self.target.announcement_for(content_id.clone());
        self.channel.publish(&announcement).await?;

        let payload_hex = announcement.payload_hex();
        info!(
            "Announced {} on topic {} over {}",
            content_id,
            self.target.topic,
            self.channel.transport()
        );
        Ok(IngestReceipt {
            content_id,
            payload_hex,
        })
    }
}
