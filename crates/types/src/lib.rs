//! Shared types for the document relay: documents, content identifiers,
//! announcements and the error taxonomy used on both the ingest and the
//! retrieval path.

pub mod announcement;
pub mod content_id;
pub mod document;
pub mod error;

pub use announcement::{
    Announcement, FilterHandle, KeyId, PublicKey, ReceivedAnnouncement, Topic, WorkParams,
};
pub use content_id::ContentId;
pub use document::Document;
pub use error::{RelayError, Result};
