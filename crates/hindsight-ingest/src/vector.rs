//! Chroma vector store client.
//!
//! Speaks the Chroma REST API against a single `messages` collection in
//! cosine space. Records are upserts keyed by message id; metadata carries
//! a snapshot (conversation id, username, timestamp, capped text snippet)
//! so search results can be labelled without a store round-trip.
//!
//! Clearing truncates the collection by dropping and lazily recreating it,
//! always invoked in tandem with clearing `messages` in the document store
//! to preserve the dual-write invariant.

use crate::error::{Error, Result};
use hindsight_core::{snippet, SNIPPET_MAX_CHARS};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Collection name for message vectors.
const COLLECTION: &str = "messages";

/// One record to upsert.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub conversation_id: String,
    pub username: Option<String>,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub text: String,
}

/// One k-NN hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity (1 − distance).
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    distances: Option<Vec<Vec<f64>>>,
}

/// Client for the Chroma REST API.
#[derive(Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base: String,
    /// Cached collection id; reset on clear so the next write recreates.
    collection_id: Arc<Mutex<Option<String>>>,
}

impl VectorStore {
    pub fn new(chroma_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base: format!("{}/api/v1", chroma_url.trim_end_matches('/')),
            collection_id: Arc::new(Mutex::new(None)),
        })
    }

    /// Get or create the `messages` collection and cache its id.
    async fn collection_id(&self) -> Result<String> {
        let mut cached = self.collection_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let response = self
            .client
            .post(format!("{}/collections", self.base))
            .json(&json!({
                "name": COLLECTION,
                "metadata": { "hnsw:space": "cosine" },
                "get_or_create": true,
            }))
            .send()
            .await?;
        let response = check(response).await?;
        let collection: CollectionResponse = response.json().await?;
        tracing::debug!(collection_id = %collection.id, "vector collection ready");
        *cached = Some(collection.id.clone());
        Ok(collection.id)
    }

    /// Upsert a batch of records keyed by message id.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let collection = self.collection_id().await?;
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let embeddings: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        let documents: Vec<String> = records
            .iter()
            .map(|r| snippet(&r.text, SNIPPET_MAX_CHARS))
            .collect();
        let metadatas: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                json!({
                    "conversation_id": r.conversation_id,
                    "username": r.username.as_deref().unwrap_or(""),
                    "ts": r.ts.to_rfc3339(),
                })
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/collections/{}/upsert", self.base, collection))
            .json(&json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// k-nearest neighbours by cosine similarity.
    pub async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<VectorHit>> {
        if n_results == 0 {
            return Ok(Vec::new());
        }
        let collection = self.collection_id().await?;
        let response = self
            .client
            .post(format!("{}/collections/{}/query", self.base, collection))
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": n_results,
                "include": ["distances"],
            }))
            .send()
            .await?;
        let response = check(response).await?;
        let parsed: QueryResponse = response.json().await?;

        let ids = parsed.ids.into_iter().next().unwrap_or_default();
        let distances = parsed
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();

        Ok(ids
            .into_iter()
            .zip(distances)
            .map(|(id, distance)| VectorHit {
                id,
                similarity: 1.0 - distance,
            })
            .collect())
    }

    /// Number of vectors in the collection.
    pub async fn count(&self) -> Result<u64> {
        let collection = self.collection_id().await?;
        let response = self
            .client
            .get(format!("{}/collections/{}/count", self.base, collection))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json::<u64>().await?)
    }

    /// Truncate the collection. The next write recreates it, so orphan
    /// vectors cannot survive a clear.
    pub async fn clear(&self) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/collections/{}", self.base, COLLECTION))
            .send()
            .await?;
        // A 404 just means the collection never existed; that is a no-op
        // truncation rather than a failure.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VectorStore(format!(
                "clear failed with {status}: {body}"
            )));
        }
        *self.collection_id.lock().await = None;
        tracing::info!("vector collection cleared");
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::VectorStore(format!(
        "vector store returned {status}: {body}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalised() {
        let store = VectorStore::new("http://chroma:8000/").unwrap();
        assert_eq!(store.base, "http://chroma:8000/api/v1");
    }

    // Upsert/query/clear require a running Chroma instance; the snippet
    // capping they rely on is covered in hindsight-core.
}
