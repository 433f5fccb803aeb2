//! Hindsight Serve - HTTP API over the ingested Slack corpus.
//!
//! This crate provides the REST surface consumed by the admin UI:
//! pipeline control (upload, start, cancel, clear), job status polling,
//! hybrid search, and read-only conversation views.
//!
//! # Architecture
//!
//! - **AppState**: shared clients (document store, vector store,
//!   embedder) plus the pipeline controller, injected at startup
//! - **Routes**: endpoint handlers grouped by domain
//! - **SearchEngine**: stateless hybrid query executor

mod error;
mod routes;
mod search;
mod state;

pub use self::error::ApiError;
pub use self::routes::router;
pub use self::search::{SearchEngine, SearchResult};
pub use self::state::AppState;
