//! Training phase: publish message embeddings to the vector store.
//!
//! Streams messages in deterministic order (conversation, then time, then
//! ingestion ordinal), embeds each text via the Ollama endpoint, and
//! upserts (id, vector, metadata) batches into the Chroma collection.
//! Embedding requests are sequential per job so the local endpoint is
//! never overwhelmed; batches bound peak memory. A batch whose embeddings
//! permanently fail is recorded as a FailedImport and skipped; the job
//! carries on.

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::jobs::JobStore;
use crate::store::Store;
use crate::vector::{VectorRecord, VectorStore};
use bson::oid::ObjectId;
use bson::Document;
use chrono::Utc;
use futures::TryStreamExt;
use hindsight_core::{FailedImport, JobStatus, EMBEDDING_DIM};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Messages embedded and upserted per vector-store write.
pub const TRAIN_BATCH: usize = 64;

/// Totals reported by a completed training run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrainOutcome {
    pub embedded: usize,
    pub failed_batches: usize,
}

/// Run the training phase for a job.
pub async fn run_training(
    store: &Store,
    jobs: &JobStore,
    vector: &VectorStore,
    embedder: &Embedder,
    job_id: &ObjectId,
    cancel: &AtomicBool,
) -> Result<TrainOutcome> {
    let total = store.message_count().await?.max(1) as usize;
    let mut cursor = store.training_cursor().await?;

    let mut outcome = TrainOutcome::default();
    let mut processed = 0usize;
    let mut batch_no = 0usize;
    let mut expected_dim: Option<usize> = None;
    let mut batch: Vec<TrainItem> = Vec::with_capacity(TRAIN_BATCH);

    while let Some(doc) = cursor.try_next().await? {
        if let Some(item) = TrainItem::from_doc(&doc) {
            batch.push(item);
        }
        if batch.len() == TRAIN_BATCH {
            flush_batch(
                store, jobs, vector, embedder, job_id, cancel, &mut batch, &mut batch_no,
                &mut expected_dim, &mut processed, total, &mut outcome,
            )
            .await?;
        }
    }
    if !batch.is_empty() {
        flush_batch(
            store, jobs, vector, embedder, job_id, cancel, &mut batch, &mut batch_no,
            &mut expected_dim, &mut processed, total, &mut outcome,
        )
        .await?;
    }

    tracing::info!(
        job_id = %job_id.to_hex(),
        embedded = outcome.embedded,
        failed_batches = outcome.failed_batches,
        "training complete"
    );
    Ok(outcome)
}

struct TrainItem {
    id: String,
    conversation_id: String,
    username: Option<String>,
    ts: chrono::DateTime<Utc>,
    text: String,
}

impl TrainItem {
    fn from_doc(doc: &Document) -> Option<Self> {
        Some(Self {
            id: doc.get_object_id("_id").ok()?.to_hex(),
            conversation_id: doc.get_str("conversation_id").ok()?.to_string(),
            username: doc.get_str("username").ok().map(String::from),
            ts: doc.get_datetime("ts").ok()?.to_chrono(),
            text: doc.get_str("text").unwrap_or_default().to_string(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn flush_batch(
    store: &Store,
    jobs: &JobStore,
    vector: &VectorStore,
    embedder: &Embedder,
    job_id: &ObjectId,
    cancel: &AtomicBool,
    batch: &mut Vec<TrainItem>,
    batch_no: &mut usize,
    expected_dim: &mut Option<usize>,
    processed: &mut usize,
    total: usize,
    outcome: &mut TrainOutcome,
) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }
    *batch_no += 1;
    let items = std::mem::take(batch);
    let count = items.len();

    match embed_batch(embedder, &items, expected_dim).await {
        Ok(records) => {
            vector.upsert(&records).await?;
            outcome.embedded += records.len();
        }
        Err(Error::Embedding(reason)) => {
            // Permanent embedding failure for this batch: record it and
            // keep going. Anything else (store I/O, cancel) aborts.
            tracing::warn!(batch = *batch_no, error = %reason, "embedding batch failed");
            let failure = FailedImport {
                job_id: Some(job_id.to_hex()),
                file_path: Path::new("training")
                    .join(format!("batch-{}", *batch_no))
                    .display()
                    .to_string(),
                line_number: -1,
                line: None,
                error: reason,
                captured_at: Utc::now(),
            };
            store.record_failures(job_id, &[failure]).await?;
            outcome.failed_batches += 1;
        }
        Err(other) => return Err(other),
    }

    *processed += count;
    let percent = ((*processed).min(total) * 100 / total) as u8;
    jobs.advance(
        job_id,
        JobStatus::Training,
        &format!("Embedded {processed} of {total} messages"),
        percent,
    )
    .await?;
    Ok(())
}

/// Embed one batch, asserting dimensional consistency across batches.
///
/// Whitespace-only texts never reach the endpoint; they get a zero vector
/// so the vector store stays in lock-step with the document store.
async fn embed_batch(
    embedder: &Embedder,
    items: &[TrainItem],
    expected_dim: &mut Option<usize>,
) -> Result<Vec<VectorRecord>> {
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let embedding = if item.text.trim().is_empty() {
            vec![0.0; expected_dim.unwrap_or(EMBEDDING_DIM)]
        } else {
            let embedding = embedder.embed(&item.text).await?;
            match *expected_dim {
                Some(dim) if embedding.len() != dim => {
                    return Err(Error::DimensionMismatch {
                        expected: dim,
                        got: embedding.len(),
                    });
                }
                None => *expected_dim = Some(embedding.len()),
                _ => {}
            }
            embedding
        };
        records.push(VectorRecord {
            id: item.id.clone(),
            embedding,
            conversation_id: item.conversation_id.clone(),
            username: item.username.clone(),
            ts: item.ts,
            text: item.text.clone(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn train_item_from_doc() {
        let id = ObjectId::new();
        let doc = doc! {
            "_id": id,
            "conversation_id": "C01",
            "username": "alice",
            "ts": bson::DateTime::now(),
            "text": "hello",
        };
        let item = TrainItem::from_doc(&doc).unwrap();
        assert_eq!(item.id, id.to_hex());
        assert_eq!(item.conversation_id, "C01");
        assert_eq!(item.username.as_deref(), Some("alice"));
    }

    #[test]
    fn docs_missing_identity_are_dropped() {
        let doc = doc! { "text": "no id or conversation" };
        assert!(TrainItem::from_doc(&doc).is_none());
    }

    // The embed/flush loop needs live Ollama and Chroma endpoints; the
    // retry/backoff policy is covered in embedding.rs.
}
