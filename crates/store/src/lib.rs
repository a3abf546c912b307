//! Content store clients.
//!
//! A content store persists a document under an identifier derived from its
//! canonical bytes, so storing the same document twice yields the same
//! identifier and a single stored object.

pub mod ipfs;
pub mod memory;

use async_trait::async_trait;
use relay_types::{ContentId, Document, Result};

pub use ipfs::IpfsContentStore;
pub use memory::MemoryContentStore;

/// Trait for content-addressed storage backends.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a document and return its content address.
    async fn put(&self, document: &Document) -> Result<ContentId>;

    /// Resolve a content address back to its document.
    ///
    /// Fails with `NotFound` when the backend has no such object and with
    /// `StoreUnavailable` when the backend cannot be reached.
    async fn get(&self, id: &ContentId) -> Result<Document>;

    /// Short backend label for logs and health output.
    fn backend(&self) -> &'static str;
}
