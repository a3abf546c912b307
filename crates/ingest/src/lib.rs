//! Ingest path: documents dropped on a local socket are stored and announced.
//!
//! [`IngestPipeline`] performs the normalize → store → announce sequence for a
//! single payload. [`IngestListener`] owns the loopback socket and feeds every
//! accepted connection through the pipeline, one at a time.

pub mod listener;
pub mod pipeline;

pub use listener::{IngestConfig, IngestHandle, IngestListener};
pub use pipeline::{AnnounceTarget, IngestPipeline, IngestReceipt};
