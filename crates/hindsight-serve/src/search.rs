//! Hybrid search engine.
//!
//! Stateless executor of `search(query, alpha, limit)`: gathers lexical
//! candidates from the document store's full-text index and semantic
//! candidates from the vector store, then fuses them with
//! [`hindsight_core::rank`]. Result consistency depends on the indexer's
//! dual-write discipline, not on anything held here.

use crate::error::ApiError;
use chrono::{DateTime, Utc};
use hindsight_core::rank::{self, Candidate};
use hindsight_ingest::{Embedder, MessageHit, Store, VectorStore};
use serde::Serialize;
use std::collections::HashMap;

/// Default and maximum result counts.
pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

/// One ranked search result, annotated with which arms contributed.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub conversation_id: String,
    pub conversation_name: String,
    pub username: Option<String>,
    pub ts: DateTime<Utc>,
    pub score: f64,
    pub keyword_match: bool,
    pub semantic_match: bool,
}

pub struct SearchEngine {
    store: Store,
    vector: VectorStore,
    embedder: Embedder,
}

impl SearchEngine {
    pub fn new(store: Store, vector: VectorStore, embedder: Embedder) -> Self {
        Self {
            store,
            vector,
            embedder,
        }
    }

    /// Execute a hybrid query.
    ///
    /// `alpha` mixes the arms: 0 is pure lexical (the full-text index
    /// ordering), 1 is pure vector. An empty query is an empty result,
    /// not an error.
    pub async fn search(
        &self,
        query: &str,
        alpha: f64,
        limit: usize,
    ) -> Result<Vec<SearchResult>, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let alpha = alpha.clamp(0.0, 1.0);
        let limit = limit.clamp(1, MAX_LIMIT);
        let fetch = limit * 2;

        let mut hits: HashMap<String, MessageHit> = HashMap::new();
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        // Lexical arm.
        if alpha < 1.0 {
            for hit in self.store.text_search(query, fetch).await? {
                candidates.insert(
                    hit.id.clone(),
                    Candidate {
                        id: hit.id.clone(),
                        lexical: hit.score,
                        semantic: None,
                        ts: hit.ts,
                        conversation_id: hit.conversation_id.clone(),
                    },
                );
                hits.insert(hit.id.clone(), hit);
            }
        }

        // Semantic arm.
        if alpha > 0.0 {
            let embedding = self.embedder.embed(query).await?;
            let vector_hits = self.vector.query(&embedding, fetch).await?;

            let missing: Vec<String> = vector_hits
                .iter()
                .filter(|h| !hits.contains_key(&h.id))
                .map(|h| h.id.clone())
                .collect();
            for hit in self.store.messages_by_ids(&missing).await? {
                hits.insert(hit.id.clone(), hit);
            }

            for vhit in vector_hits {
                let Some(doc) = hits.get(&vhit.id) else {
                    // Orphan vector: no backing message (cleared mid-flight
                    // or partial import). Skip rather than fabricate.
                    tracing::debug!(id = %vhit.id, "vector hit without document, skipped");
                    continue;
                };
                candidates
                    .entry(vhit.id.clone())
                    .and_modify(|c| c.semantic = Some(vhit.similarity))
                    .or_insert(Candidate {
                        id: vhit.id.clone(),
                        lexical: None,
                        semantic: Some(vhit.similarity),
                        ts: doc.ts,
                        conversation_id: doc.conversation_id.clone(),
                    });
            }
        }

        let ranked = rank::fuse(candidates.into_values().collect(), alpha, limit);

        // Hydrate conversation names for the UI labels.
        let mut conv_names: HashMap<String, String> = HashMap::new();
        for r in &ranked {
            if let Some(hit) = hits.get(&r.id) {
                if !conv_names.contains_key(&hit.conversation_id) {
                    let name = self
                        .store
                        .get_conversation(&hit.conversation_id)
                        .await?
                        .map(|c| c.name)
                        .unwrap_or_else(|| "Unknown".to_string());
                    conv_names.insert(hit.conversation_id.clone(), name);
                }
            }
        }

        Ok(ranked
            .into_iter()
            .filter_map(|r| {
                let hit = hits.get(&r.id)?;
                Some(SearchResult {
                    id: r.id,
                    text: hit.text.clone(),
                    conversation_id: hit.conversation_id.clone(),
                    conversation_name: conv_names
                        .get(&hit.conversation_id)
                        .cloned()
                        .unwrap_or_else(|| "Unknown".to_string()),
                    username: hit.username.clone(),
                    ts: hit.ts,
                    score: r.score,
                    keyword_match: r.keyword_match,
                    semantic_match: r.semantic_match,
                })
            })
            .collect())
    }
}
