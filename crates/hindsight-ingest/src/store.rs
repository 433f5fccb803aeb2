//! MongoDB document store wrapper.
//!
//! Owns the `messages`, `conversations`, `users`, `files`, and
//! `failed_imports` collections, index creation (run-once per process),
//! batched message inserts with duplicate suppression, and the clear
//! operations. The vector store is cleared in tandem with `messages` by
//! the callers of [`Store::clear_corpus`] to preserve the dual-write
//! invariant.

use crate::error::Result;
use bson::{doc, oid::ObjectId, Bson, Document};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use hindsight_core::{Conversation, ConversationKind, FailedImport, Message, User};
use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Collection, Cursor, Database, IndexModel};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Batch size for message inserts.
pub const MESSAGE_BATCH: usize = 500;

/// MongoDB server error code for a unique-index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Handle to the document store.
#[derive(Clone)]
pub struct Store {
    pub(crate) messages: Collection<Document>,
    conversations: Collection<Document>,
    users: Collection<Document>,
    files: Collection<Document>,
    failed_imports: Collection<Document>,
    indexes_ready: Arc<OnceCell<()>>,
}

/// A message row hydrated for search results and conversation views.
#[derive(Debug, Clone)]
pub struct MessageHit {
    pub id: String,
    pub conversation_id: String,
    pub username: Option<String>,
    pub text: String,
    pub ts: DateTime<Utc>,
    /// Full-text score when produced by a `$text` query.
    pub score: Option<f64>,
}

/// Conversation plus its message count, for listings.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub message_count: u64,
}

impl Store {
    pub fn new(db: &Database) -> Self {
        Self {
            messages: db.collection("messages"),
            conversations: db.collection("conversations"),
            users: db.collection("users"),
            files: db.collection("files"),
            failed_imports: db.collection("failed_imports"),
            indexes_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Ensure all indexes exist. Guarded so concurrent jobs only run the
    /// creation once per process; MongoDB makes re-creation idempotent
    /// anyway.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.indexes_ready
            .get_or_try_init(|| async {
                self.messages
                    .create_index(IndexModel::builder().keys(doc! { "text": "text" }).build())
                    .await?;
                self.messages
                    .create_index(
                        IndexModel::builder()
                            .keys(doc! { "conversation_id": 1 })
                            .build(),
                    )
                    .await?;
                self.messages
                    .create_index(IndexModel::builder().keys(doc! { "ts": 1 }).build())
                    .await?;
                self.messages
                    .create_index(IndexModel::builder().keys(doc! { "username": 1 }).build())
                    .await?;
                self.messages
                    .create_index(
                        IndexModel::builder()
                            .keys(doc! { "dedup_key": 1 })
                            .options(IndexOptions::builder().unique(true).build())
                            .build(),
                    )
                    .await?;
                self.conversations
                    .create_index(
                        IndexModel::builder()
                            .keys(doc! { "id": 1 })
                            .options(IndexOptions::builder().unique(true).build())
                            .build(),
                    )
                    .await?;
                self.users
                    .create_index(
                        IndexModel::builder()
                            .keys(doc! { "username": 1 })
                            .options(IndexOptions::builder().unique(true).build())
                            .build(),
                    )
                    .await?;
                tracing::info!("document store indexes ensured");
                Ok::<(), crate::error::Error>(())
            })
            .await?;
        Ok(())
    }

    // ── Conversations ──────────────────────────────────────────────────

    /// Upsert a conversation by export id. The kind is written only on
    /// insert; it is immutable after creation.
    pub async fn upsert_conversation(&self, conv: &Conversation) -> Result<()> {
        let mut set = doc! {
            "name": &conv.name,
            "members": conv.members.clone(),
        };
        if let Some(created) = conv.created {
            set.insert("created", bson::DateTime::from_chrono(created));
        }
        if let Some(creator) = &conv.creator {
            set.insert("creator", creator);
        }
        if let Some(topic) = &conv.topic {
            set.insert("topic", bson::to_bson(topic)?);
        }
        if let Some(purpose) = &conv.purpose {
            set.insert("purpose", bson::to_bson(purpose)?);
        }

        self.conversations
            .update_one(
                doc! { "id": &conv.id },
                doc! {
                    "$set": set,
                    "$setOnInsert": {
                        "id": &conv.id,
                        "kind": kind_str(conv.kind),
                        "is_archived": false,
                    },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    /// Flip a conversation's archive flag (driven by `channel_archive`
    /// system messages during import).
    pub async fn mark_archived(
        &self,
        conversation_id: &str,
        archived_by: Option<&str>,
        archived_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conversations
            .update_one(
                doc! { "id": conversation_id },
                doc! { "$set": {
                    "is_archived": true,
                    "archived_by": archived_by,
                    "archived_at": bson::DateTime::from_chrono(archived_at),
                } },
            )
            .await?;
        Ok(())
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let doc = self.conversations.find_one(doc! { "id": id }).await?;
        Ok(doc.map(|d| conversation_from_doc(&d)))
    }

    /// All conversations with their message counts, sorted by name.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut cursor = self
            .messages
            .aggregate([doc! { "$group": { "_id": "$conversation_id", "count": { "$sum": 1 } } }])
            .await?;
        while let Some(row) = cursor.try_next().await? {
            if let (Ok(id), Ok(count)) = (row.get_str("_id"), row.get_i32("count")) {
                counts.insert(id.to_string(), count as u64);
            } else if let (Ok(id), Ok(count)) = (row.get_str("_id"), row.get_i64("count")) {
                counts.insert(id.to_string(), count as u64);
            }
        }

        let mut cursor = self
            .conversations
            .find(doc! {})
            .sort(doc! { "name": 1 })
            .await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            let conversation = conversation_from_doc(&doc);
            let message_count = counts.get(&conversation.id).copied().unwrap_or(0);
            out.push(ConversationSummary {
                conversation,
                message_count,
            });
        }
        Ok(out)
    }

    // ── Messages ───────────────────────────────────────────────────────

    /// Insert a batch of messages, skipping duplicates from prior runs.
    ///
    /// Returns (inserted, skipped). Known duplicates are filtered out by
    /// dedup key before insert; the insert itself is unordered, and any
    /// remaining duplicate-key errors from the unique index (concurrent
    /// jobs importing overlapping exports) are also counted as skips
    /// rather than failing the batch.
    pub async fn insert_messages(
        &self,
        job_id: &ObjectId,
        batch: &[Message],
    ) -> Result<(usize, usize)> {
        if batch.is_empty() {
            return Ok((0, 0));
        }

        let keys: Vec<String> = batch.iter().map(dedup_key).collect();
        let mut existing = std::collections::HashSet::new();
        let mut cursor = self
            .messages
            .find(doc! { "dedup_key": { "$in": keys.clone() } })
            .projection(doc! { "dedup_key": 1 })
            .await?;
        while let Some(doc) = cursor.try_next().await? {
            if let Ok(key) = doc.get_str("dedup_key") {
                existing.insert(key.to_string());
            }
        }

        let docs: Vec<Document> = batch
            .iter()
            .zip(&keys)
            .filter(|(_, key)| !existing.contains(*key))
            .map(|(message, key)| message_to_doc(message, key, job_id))
            .collect();

        let mut skipped = batch.len() - docs.len();
        if docs.is_empty() {
            return Ok((0, skipped));
        }

        let docs_len = docs.len();
        let inserted = match self.messages.insert_many(docs).ordered(false).await {
            Ok(result) => result.inserted_ids.len(),
            Err(e) => {
                // An unordered insert attempts every document; pull apart
                // the failure and treat pure duplicate-key errors (E11000)
                // as skips. Anything else is a real store failure.
                let duplicates_only = match e.kind.as_ref() {
                    ErrorKind::InsertMany(failure) => failure
                        .write_errors
                        .as_ref()
                        .filter(|errs| !errs.is_empty())
                        .and_then(|errs| {
                            errs.iter()
                                .all(|write_error| write_error.code == DUPLICATE_KEY_CODE)
                                .then(|| (docs_len - errs.len(), errs.len()))
                        }),
                    _ => None,
                };
                match duplicates_only {
                    Some((inserted, duplicates)) => {
                        tracing::debug!(duplicates, "duplicate messages raced in; skipped");
                        skipped += duplicates;
                        inserted
                    }
                    None => return Err(e.into()),
                }
            }
        };
        Ok((inserted, skipped))
    }

    /// Full-text search over message text, ranked by text score.
    pub async fn text_search(&self, query: &str, limit: usize) -> Result<Vec<MessageHit>> {
        let mut cursor = self
            .messages
            .find(doc! { "$text": { "$search": query } })
            .projection(doc! { "score": { "$meta": "textScore" } })
            .sort(doc! { "score": { "$meta": "textScore" } })
            .limit(limit as i64)
            .await?;
        let mut hits = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            hits.push(hit_from_doc(&doc));
        }
        Ok(hits)
    }

    /// Fetch messages by `_id` hex strings (hydration for vector hits).
    pub async fn messages_by_ids(&self, ids: &[String]) -> Result<Vec<MessageHit>> {
        let oids: Vec<ObjectId> = ids
            .iter()
            .filter_map(|id| ObjectId::parse_str(id).ok())
            .collect();
        if oids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cursor = self
            .messages
            .find(doc! { "_id": { "$in": oids } })
            .await?;
        let mut hits = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            hits.push(hit_from_doc(&doc));
        }
        Ok(hits)
    }

    /// One page of a conversation, oldest first, with an optional
    /// case-insensitive substring filter.
    pub async fn conversation_page(
        &self,
        conversation_id: &str,
        filter_text: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<MessageHit>> {
        let mut filter = doc! { "conversation_id": conversation_id };
        if let Some(q) = filter_text {
            if !q.is_empty() {
                filter.insert("text", doc! { "$regex": regex_escape(q), "$options": "i" });
            }
        }
        let mut cursor = self
            .messages
            .find(filter)
            .sort(doc! { "ts": 1, "seq": 1 })
            .skip(page * page_size)
            .limit(page_size as i64)
            .await?;
        let mut hits = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            hits.push(hit_from_doc(&doc));
        }
        Ok(hits)
    }

    /// Fetch up to `size` messages either side of a pivot timestamp in one
    /// conversation, plus the pivot messages themselves, in time order.
    ///
    /// Backs the context view around a search hit. Orphaned pivots (a
    /// timestamp with no message) still return the surrounding window.
    pub async fn context_window(
        &self,
        conversation_id: &str,
        ts: DateTime<Utc>,
        size: u64,
    ) -> Result<Vec<MessageHit>> {
        let pivot = bson::DateTime::from_chrono(ts);

        let mut before = Vec::new();
        let mut cursor = self
            .messages
            .find(doc! { "conversation_id": conversation_id, "ts": { "$lt": pivot } })
            .sort(doc! { "ts": -1, "seq": -1 })
            .limit(size as i64)
            .await?;
        while let Some(doc) = cursor.try_next().await? {
            before.push(hit_from_doc(&doc));
        }
        before.reverse();

        let mut window = before;
        let mut cursor = self
            .messages
            .find(doc! { "conversation_id": conversation_id, "ts": pivot })
            .sort(doc! { "seq": 1 })
            .await?;
        while let Some(doc) = cursor.try_next().await? {
            window.push(hit_from_doc(&doc));
        }

        let mut cursor = self
            .messages
            .find(doc! { "conversation_id": conversation_id, "ts": { "$gt": pivot } })
            .sort(doc! { "ts": 1, "seq": 1 })
            .limit(size as i64)
            .await?;
        while let Some(doc) = cursor.try_next().await? {
            window.push(hit_from_doc(&doc));
        }

        Ok(window)
    }

    /// Stream all messages in training order (conversation, then time,
    /// then ingestion ordinal).
    pub async fn training_cursor(&self) -> Result<Cursor<Document>> {
        Ok(self
            .messages
            .find(doc! {})
            .sort(doc! { "conversation_id": 1, "ts": 1, "seq": 1 })
            .await?)
    }

    pub async fn message_count(&self) -> Result<u64> {
        Ok(self.messages.count_documents(doc! {}).await?)
    }

    // ── Users ──────────────────────────────────────────────────────────

    /// Merge per-file user aggregates into the `users` collection.
    pub async fn upsert_users(&self, users: &HashMap<String, User>) -> Result<()> {
        for user in users.values() {
            self.users
                .update_one(
                    doc! { "username": &user.username },
                    doc! {
                        "$min": { "first_seen": bson::DateTime::from_chrono(user.first_seen) },
                        "$max": { "last_seen": bson::DateTime::from_chrono(user.last_seen) },
                        "$addToSet": { "conversations": { "$each": user.conversations.clone() } },
                        "$inc": { "message_count": user.message_count as i64 },
                    },
                )
                .upsert(true)
                .await?;
        }
        Ok(())
    }

    // ── Files ──────────────────────────────────────────────────────────

    /// Upsert file metadata keyed by the export file id.
    pub async fn upsert_file(&self, id: &str, name: &str, mimetype: &str, path: &str) -> Result<()> {
        self.files
            .update_one(
                doc! { "id": id },
                doc! { "$set": { "id": id, "name": name, "mimetype": mimetype, "path": path } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    // ── Failed imports ─────────────────────────────────────────────────

    pub async fn record_failures(
        &self,
        job_id: &ObjectId,
        failures: &[FailedImport],
    ) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let docs: Vec<Document> = failures
            .iter()
            .map(|f| {
                doc! {
                    "job_id": *job_id,
                    "file_path": &f.file_path,
                    "line_number": f.line_number,
                    "line": f.line.as_deref().map(Bson::from).unwrap_or(Bson::Null),
                    "error": &f.error,
                    "captured_at": bson::DateTime::from_chrono(f.captured_at),
                }
            })
            .collect();
        self.failed_imports.insert_many(docs).await?;
        Ok(())
    }

    pub async fn failed_import_count(&self) -> Result<u64> {
        Ok(self.failed_imports.count_documents(doc! {}).await?)
    }

    // ── Clearing ───────────────────────────────────────────────────────

    /// Delete the whole corpus: messages, conversations, users, files and
    /// failure records. Callers clear the vector store in the same breath.
    pub async fn clear_corpus(&self) -> Result<u64> {
        let deleted = self.messages.delete_many(doc! {}).await?.deleted_count;
        self.conversations.delete_many(doc! {}).await?;
        self.users.delete_many(doc! {}).await?;
        self.files.delete_many(doc! {}).await?;
        self.failed_imports.delete_many(doc! {}).await?;
        tracing::info!(messages = deleted, "corpus cleared");
        Ok(deleted)
    }
}

/// Duplicate-suppression key: SHA-256 over the message identity fields.
/// `system_action` participates so identical system lines with colliding
/// timestamps stay distinct.
pub fn dedup_key(message: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.conversation_id.as_bytes());
    hasher.update(message.ts.timestamp_millis().to_le_bytes());
    hasher.update(message.text.as_bytes());
    if let Some(action) = &message.system_action {
        hasher.update(action.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn message_to_doc(message: &Message, dedup_key: &str, job_id: &ObjectId) -> Document {
    let reactions: Vec<Document> = message
        .reactions
        .iter()
        .map(|r| doc! { "emoji": &r.emoji, "users": r.users.clone() })
        .collect();
    let files: Vec<Document> = message
        .files
        .iter()
        .map(|f| {
            doc! {
                "id": f.id.as_deref().map(Bson::from).unwrap_or(Bson::Null),
                "name": f.name.as_deref().map(Bson::from).unwrap_or(Bson::Null),
                "mimetype": f.mimetype.as_deref().map(Bson::from).unwrap_or(Bson::Null),
            }
        })
        .collect();

    let mut doc = doc! {
        "conversation_id": &message.conversation_id,
        "seq": message.seq,
        "username": message.username.as_deref().map(Bson::from).unwrap_or(Bson::Null),
        "text": &message.text,
        "ts": bson::DateTime::from_chrono(message.ts),
        "type": message.kind.as_str(),
        "is_edited": message.is_edited,
        "reactions": reactions,
        "files": files,
        "reply_count": message.reply_count,
        "reply_users_count": message.reply_users_count,
        "dedup_key": dedup_key,
        "job_id": *job_id,
    };
    if let Some(thread_ts) = message.thread_ts {
        doc.insert("thread_ts", bson::DateTime::from_chrono(thread_ts));
    }
    if let Some(action) = &message.system_action {
        doc.insert("system_action", action);
    }
    doc
}

fn hit_from_doc(doc: &Document) -> MessageHit {
    MessageHit {
        id: doc
            .get_object_id("_id")
            .map(|id| id.to_hex())
            .unwrap_or_default(),
        conversation_id: doc.get_str("conversation_id").unwrap_or_default().to_string(),
        username: doc.get_str("username").ok().map(String::from),
        text: doc.get_str("text").unwrap_or_default().to_string(),
        ts: doc
            .get_datetime("ts")
            .map(|dt| dt.to_chrono())
            .unwrap_or_else(|_| Utc::now()),
        score: doc.get_f64("score").ok(),
    }
}

fn conversation_from_doc(doc: &Document) -> Conversation {
    let kind = match doc.get_str("kind").unwrap_or("channel") {
        "direct_message" => ConversationKind::DirectMessage,
        "multi_party_dm" => ConversationKind::MultiPartyDm,
        "phone_call" => ConversationKind::PhoneCall,
        _ => ConversationKind::Channel,
    };
    let mut conv = Conversation::new(
        doc.get_str("id").unwrap_or_default().to_string(),
        doc.get_str("name").unwrap_or_default().to_string(),
        kind,
    );
    conv.created = doc.get_datetime("created").ok().map(|dt| dt.to_chrono());
    conv.creator = doc.get_str("creator").ok().map(String::from);
    conv.is_archived = doc.get_bool("is_archived").unwrap_or(false);
    conv.archived_by = doc.get_str("archived_by").ok().map(String::from);
    conv.archived_at = doc.get_datetime("archived_at").ok().map(|dt| dt.to_chrono());
    conv.topic = doc
        .get_document("topic")
        .ok()
        .and_then(|d| bson::from_bson(Bson::Document(d.clone())).ok());
    conv.purpose = doc
        .get_document("purpose")
        .ok()
        .and_then(|d| bson::from_bson(Bson::Document(d.clone())).ok());
    if let Ok(members) = doc.get_array("members") {
        conv.members = members
            .iter()
            .filter_map(|m| m.as_str().map(String::from))
            .collect();
    }
    conv
}

fn kind_str(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::Channel => "channel",
        ConversationKind::DirectMessage => "direct_message",
        ConversationKind::MultiPartyDm => "multi_party_dm",
        ConversationKind::PhoneCall => "phone_call",
    }
}

fn regex_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hindsight_core::MessageKind;

    fn message(conversation: &str, secs: i64, text: &str) -> Message {
        let mut m = Message::new(
            MessageKind::Message,
            Utc.timestamp_opt(secs, 0).unwrap(),
            text.to_string(),
        );
        m.conversation_id = conversation.to_string();
        m
    }

    #[test]
    fn dedup_key_is_stable_and_distinguishes_identity() {
        let a = message("C01", 100, "hello");
        let b = message("C01", 100, "hello");
        assert_eq!(dedup_key(&a), dedup_key(&b));

        assert_ne!(dedup_key(&a), dedup_key(&message("C02", 100, "hello")));
        assert_ne!(dedup_key(&a), dedup_key(&message("C01", 101, "hello")));
        assert_ne!(dedup_key(&a), dedup_key(&message("C01", 100, "goodbye")));
    }

    #[test]
    fn dedup_key_includes_system_action() {
        let mut a = message("C01", 100, "");
        a.kind = MessageKind::System;
        a.system_action = Some("channel_join".into());
        let mut b = message("C01", 100, "");
        b.kind = MessageKind::System;
        b.system_action = Some("channel_leave".into());
        assert_ne!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn message_doc_preserves_type_tag_and_identity() {
        let mut m = message("C01", 100, "see files");
        m.kind = MessageKind::FileShare;
        m.files.push(hindsight_core::FileRef {
            id: Some("F01".into()),
            name: Some("report.pdf".into()),
            mimetype: Some("application/pdf".into()),
        });
        m.thread_ts = Some(Utc.timestamp_opt(90, 0).unwrap());
        let key = dedup_key(&m);
        let doc = message_to_doc(&m, &key, &ObjectId::new());
        assert_eq!(doc.get_str("type").unwrap(), "file_share");
        assert_eq!(doc.get_str("dedup_key").unwrap(), key);
        assert!(doc.get_datetime("thread_ts").is_ok());
        let files = doc.get_array("files").unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn regex_escape_neutralises_metacharacters() {
        assert_eq!(regex_escape("a.b*c"), "a\\.b\\*c");
        assert_eq!(regex_escape("plain"), "plain");
    }

    // Insert/search paths need a running MongoDB instance and are covered
    // by the pure helpers above.
}
