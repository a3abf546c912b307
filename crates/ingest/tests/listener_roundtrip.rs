use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_channel::{AnnouncementChannel, MemoryChannel};
use relay_ingest::{AnnounceTarget, IngestConfig, IngestListener, IngestPipeline};
use relay_store::{ContentStore, MemoryContentStore};
use relay_types::{FilterHandle, KeyId, PublicKey, ReceivedAnnouncement, Topic, WorkParams};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

const PUBKEY: &str = "0x0476a7fe325709fe6420b216d7fb3bea263b012f44bfd5a00a1c7e125f0cfe2b220d6d1a6e5f0ed87ef39953d4a19969cf7d100cd52546b0a970ae0956001b83ce";

struct Harness {
    store: MemoryContentStore,
    channel: MemoryChannel,
    filter: FilterHandle,
    pipeline: IngestPipeline,
}

impl Harness {
    async fn new() -> Self {
        let key_id =
            KeyId::parse("20b637d3d40cb74875765250e8ad693aceed234b500c02adec0e279f4daaf49a")
                .unwrap();
        let public_key = PublicKey::from_hex(PUBKEY).unwrap();
        let topic = Topic::from_hex("0x12345678").unwrap();

        let store = MemoryContentStore::new();
        let channel = MemoryChannel::with_key(key_id.clone(), public_key.clone());
        let filter = channel.create_filter(topic, &key_id).await.unwrap();
        let pipeline = IngestPipeline::new(
            Arc::new(store.clone()),
            Arc::new(channel.clone()),
            AnnounceTarget {
                topic,
                recipient_public_key: public_key,
                work: WorkParams::default(),
            },
        );

        Self {
            store,
            channel,
            filter,
            pipeline,
        }
    }

    /// Poll until `count` announcements have arrived or two seconds pass.
    async fn wait_for(&self, count: usize) -> Vec<ReceivedAnnouncement> {
        let mut received = Vec::new();
        for _ in 0..100 {
            received.extend(self.channel.poll(&self.filter).await.unwrap());
            if received.len() >= count {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        received
    }
}

fn loopback_config() -> IngestConfig {
    IngestConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        poll_interval: Duration::from_millis(20),
    }
}

async fn submit(addr: SocketAddr, bytes: &[u8]) {
    let mut stream = TcpStream::connect(addr).await.expect("connect to ingest");
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn single_quoted_document_is_stored_and_announced() {
    let harness = Harness::new().await;
    let listener = IngestListener::bind(&loopback_config(), harness.pipeline.clone())
        .await
        .unwrap();
    let handle = listener.spawn();

    submit(handle.local_addr(), b"{'a': 1}").await;

    let received = harness.wait_for(1).await;
    assert_eq!(received.len(), 1);

    let document = harness.store.get(&received[0].payload).await.unwrap();
    assert_eq!(document.as_value(), &json!({"a": 1}));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_input_produces_nothing() {
    let harness = Harness::new().await;
    let handle = IngestListener::bind(&loopback_config(), harness.pipeline.clone())
        .await
        .unwrap()
        .spawn();

    submit(handle.local_addr(), b"{'name': 'O'Brien'}").await;
    submit(handle.local_addr(), b"\xff\xfe not utf8").await;
    // Connections are serviced in order, so this one marks the end of the batch.
    submit(handle.local_addr(), b"{\"marker\": true}").await;

    let received = harness.wait_for(1).await;
    assert_eq!(received.len(), 1);
    assert_eq!(harness.store.len(), 1);
    assert_eq!(harness.channel.published_count(), 1);

    let document = harness.store.get(&received[0].payload).await.unwrap();
    assert_eq!(document.as_value(), &json!({"marker": true}));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn repeated_document_announced_twice_stored_once() {
    let harness = Harness::new().await;
    let handle = IngestListener::bind(&loopback_config(), harness.pipeline.clone())
        .await
        .unwrap()
        .spawn();

    submit(handle.local_addr(), b"{'reading': 42}").await;
    submit(handle.local_addr(), b"{'reading': 42}").await;

    let received = harness.wait_for(2).await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].payload, received[1].payload);
    assert_eq!(harness.store.len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn stop_releases_the_socket() {
    let harness = Harness::new().await;
    let handle = IngestListener::bind(&loopback_config(), harness.pipeline.clone())
        .await
        .unwrap()
        .spawn();
    let addr = handle.local_addr();

    handle.stop();
    handle.join().await.unwrap();

    let rebound = tokio::net::TcpListener::bind(addr).await;
    assert!(rebound.is_ok(), "socket still held: {:?}", rebound.err());
}

#[tokio::test]
async fn stop_from_another_task() {
    let harness = Harness::new().await;
    let handle = IngestListener::bind(&loopback_config(), harness.pipeline.clone())
        .await
        .unwrap()
        .spawn();

    let handle = Arc::new(handle);
    let stopper = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.stop() })
    };
    stopper.await.unwrap();

    let handle = Arc::try_unwrap(handle).ok().expect("single owner after stop");
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("listener exits within the poll interval")
        .unwrap();
}
