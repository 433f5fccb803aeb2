//! Slack export ingestion pipeline.
//!
//! This crate drives a raw export archive through to a queryable index:
//!
//! ```text
//! [Archive] → [Extractor] → [Parser] → [Indexer] → [Training]
//!                  ↓            ↓          ↓            ↓
//!              extract tree  records    MongoDB      Chroma
//! ```
//!
//! The [`pipeline::Pipeline`] controller sequences the stages, writing
//! every transition and progress bump through the [`jobs::JobStore`] so
//! the HTTP layer can observe them. All stages poll a per-job cancel flag
//! between units of work.

pub mod embedding;
mod error;
pub mod extract;
pub mod indexer;
pub mod jobs;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod train;
pub mod vector;

pub use embedding::Embedder;
pub use error::{Error, Result};
pub use jobs::JobStore;
pub use pipeline::Pipeline;
pub use store::{ConversationSummary, MessageHit, Store};
pub use vector::{VectorHit, VectorRecord, VectorStore};

use hindsight_core::Config;
use mongodb::{Client, Database};

/// Connect to the document store named by the configuration.
pub async fn connect_mongo(config: &Config) -> Result<Database> {
    let client = Client::with_uri_str(&config.mongo_url).await?;
    let db = client.database(&config.mongo_db);
    tracing::info!(db = %config.mongo_db, "connected to document store");
    Ok(db)
}
