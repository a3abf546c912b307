//! In-memory content store (for testing and single-process deployments).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_types::{ContentId, Document, RelayError, Result};
use tracing::debug;

use crate::ContentStore;

/// Content store keyed by the BLAKE3 digest of each document's canonical bytes.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    inner: Arc<MemoryContentStoreInner>,
}

#[derive(Default)]
struct MemoryContentStoreInner {
    /// Content id -> canonical bytes
    objects: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored objects.
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.inner.objects.read().contains_key(id)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, document: &Document) -> Result<ContentId> {
        let bytes = document.canonical_bytes();
        let id = ContentId::from_data(&bytes);

        let mut objects = self.inner.objects.write();
        if objects.contains_key(&id) {
            debug!("Object {} already stored, skipping", id);
        } else {
            objects.insert(id.clone(), bytes);
        }

        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Document> {
        let bytes = {
            let objects = self.inner.objects.read();
            objects
                .get(id)
                .cloned()
                .ok_or_else(|| RelayError::not_found(id.to_string()))?
        };
        Document::from_slice(&bytes)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryContentStore::new();
        let doc = Document::from_value(json!({"speed": 42, "unit": "km/h"}));

        let id = store.put(&doc).await.unwrap();
        let retrieved = store.get(&id).await.unwrap();

        assert_eq!(retrieved, doc);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryContentStore::new();
        let doc = Document::from_value(json!({"a": 1}));

        let first = store.put(&doc).await.unwrap();
        let second = store.put(&doc).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_id_is_digest_of_canonical_bytes() {
        let store = MemoryContentStore::new();
        let doc = Document::normalize(b"{'b': 2, 'a': 1}").unwrap();

        let id = store.put(&doc).await.unwrap();

        assert_eq!(id, ContentId::from_data(b"{\"a\":1,\"b\":2}"));
        assert!(store.contains(&id));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = MemoryContentStore::new();
        let missing = ContentId::from_data(b"never stored");

        let result = store.get(&missing).await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_clones_share_objects() {
        let store = MemoryContentStore::new();
        let clone = store.clone();

        let id = store.put(&Document::from_value(json!([1, 2, 3]))).await.unwrap();

        assert!(clone.contains(&id));
        assert!(!clone.is_empty());
    }
}
