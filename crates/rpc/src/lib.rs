//! HTTP retrieval service over the announcement channel and content store.
//!
//! Routes:
//! - `GET /get_new_messages` drains the subscription filter
//! - `GET /cat/:content_id` resolves a content id
//! - `GET /cat_last` advances to the newest announcement and resolves it
//! - `GET /health`, `GET /metrics`

mod latest;
mod server;


pub use latest::LatestCell;
pub use server::{build_router, start_server, AppState, ServiceConfig, NO_MESSAGES_SENTINEL};
