//! Import phase: persist parser output into the document store.
//!
//! Walks the extracted export tree file by file, upserting conversations,
//! batching message inserts (with duplicate suppression, so re-runs are
//! idempotent), aggregating user activity, resolving file metadata against
//! the extract tree, and publishing progress after every batch. Per-file
//! and per-line failures become FailedImport records and never halt the
//! job; the cancel flag is polled between files and between batches.

use crate::error::{Error, Result};
use crate::jobs::JobStore;
use crate::parser::{self, ExportWalker};
use crate::store::{Store, MESSAGE_BATCH};
use bson::oid::ObjectId;
use hindsight_core::{JobStatus, Message, MessageKind, User};
use std::collections::HashMap;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Totals reported by a completed import.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportOutcome {
    pub files: usize,
    pub conversations: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failures: usize,
}

/// Run the import phase over an extracted tree.
///
/// `file_storage` is the root where shared-file attachments are copied so
/// they outlive a cleared extract tree.
pub async fn run_import(
    store: &Store,
    jobs: &JobStore,
    job_id: &ObjectId,
    extract_root: &Path,
    file_storage: &Path,
    cancel: &AtomicBool,
) -> Result<ImportOutcome> {
    store.ensure_indexes().await?;

    let export_root = parser::resolve_export_root(extract_root)?;
    let walker = ExportWalker::new(extract_root)?;
    let paths: Vec<PathBuf> = walker.collect();

    // Cheap pre-scan so progress can say "N of M messages". The count is
    // an upper bound (unparseable lines are included) which only makes the
    // bar conservative.
    let total_estimate: usize = paths.iter().map(|p| estimate_message_lines(p)).sum();
    let total_estimate = total_estimate.max(1);

    let mut outcome = ImportOutcome {
        files: paths.len(),
        ..Default::default()
    };
    let mut processed = 0usize;

    for path in &paths {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let parsed = parser::parse_file(path);
        if !parsed.failures.is_empty() {
            outcome.failures += parsed.failures.len();
            store.record_failures(job_id, &parsed.failures).await?;
        }

        let Some(conversation) = parsed.conversation else {
            continue;
        };
        store.upsert_conversation(&conversation).await?;
        outcome.conversations += 1;

        apply_archive_flags(store, &parsed.messages).await?;
        index_shared_files(store, &export_root, file_storage, &parsed.messages).await?;

        let users = aggregate_users(&conversation.id, &parsed.messages);
        store.upsert_users(&users).await?;

        for batch in parsed.messages.chunks(MESSAGE_BATCH) {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let (inserted, skipped) = store.insert_messages(job_id, batch).await?;
            outcome.inserted += inserted;
            outcome.skipped += skipped;
            processed += batch.len();

            let percent = ((processed.min(total_estimate) * 100) / total_estimate) as u8;
            jobs.advance(
                job_id,
                JobStatus::Importing,
                &format!("Imported {processed} of {total_estimate} messages"),
                percent,
            )
            .await?;
        }
    }

    tracing::info!(
        job_id = %job_id.to_hex(),
        files = outcome.files,
        conversations = outcome.conversations,
        inserted = outcome.inserted,
        skipped = outcome.skipped,
        failures = outcome.failures,
        "import complete"
    );
    Ok(outcome)
}

/// Count plausible message lines for the progress denominator.
fn estimate_message_lines(path: &Path) -> usize {
    let Ok(file) = fs::File::open(path) else {
        return 0;
    };
    let reader = std::io::BufReader::new(file);
    reader
        .lines()
        .map_while(|l| l.ok())
        .filter(|l| l.starts_with('['))
        .count()
}

/// `channel_archive` messages flip the conversation's archive flag.
async fn apply_archive_flags(store: &Store, messages: &[Message]) -> Result<()> {
    for message in messages {
        if message.kind == MessageKind::Archive {
            store
                .mark_archived(
                    &message.conversation_id,
                    message.username.as_deref(),
                    message.ts,
                )
                .await?;
        }
    }
    Ok(())
}

/// Resolve file-share references against `files/<id>/` in the extract
/// tree, copy the attachment into file storage, and store its metadata.
async fn index_shared_files(
    store: &Store,
    export_root: &Path,
    file_storage: &Path,
    messages: &[Message],
) -> Result<()> {
    for message in messages {
        for file in &message.files {
            let Some(id) = &file.id else {
                continue;
            };
            let (name, path) = match find_stored_file(export_root, id) {
                Some((name, source)) => {
                    let stored = copy_to_storage(file_storage, id, &name, &source);
                    (name, stored.display().to_string())
                }
                None => (
                    file.name.clone().unwrap_or_else(|| id.clone()),
                    String::new(),
                ),
            };
            let mimetype = file
                .mimetype
                .clone()
                .unwrap_or_else(|| guess_mimetype(&name).to_string());
            store.upsert_file(id, &name, &mimetype, &path).await?;
        }
    }
    Ok(())
}

/// Copy one attachment under `<FILE_STORAGE>/<id>/<name>` so it survives
/// a cleared extract tree. Falls back to the in-tree path on failure.
fn copy_to_storage(file_storage: &Path, id: &str, name: &str, source: &Path) -> PathBuf {
    let dest_dir = file_storage.join(id);
    let dest = dest_dir.join(name);
    if dest.is_file() {
        return dest;
    }
    let copied = fs::create_dir_all(&dest_dir).and_then(|_| fs::copy(source, &dest));
    match copied {
        Ok(_) => dest,
        Err(e) => {
            tracing::warn!(
                file_id = id,
                error = %e,
                "failed to copy attachment into file storage"
            );
            source.to_path_buf()
        }
    }
}

/// Locate the on-disk copy of an exported file under `files/<id>/`.
fn find_stored_file(export_root: &Path, file_id: &str) -> Option<(String, PathBuf)> {
    let dir = export_root.join("files").join(file_id);
    let entry = fs::read_dir(dir).ok()?.filter_map(|e| e.ok()).find(|e| {
        e.file_type().map(|t| t.is_file()).unwrap_or(false)
    })?;
    let name = entry.file_name().to_string_lossy().into_owned();
    Some((name, entry.path()))
}

/// Map a filename extension to a MIME type for the files collection.
fn guess_mimetype(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}

/// Aggregate user activity for one file before the store upsert.
fn aggregate_users(conversation_id: &str, messages: &[Message]) -> HashMap<String, User> {
    let mut users: HashMap<String, User> = HashMap::new();
    for message in messages {
        let Some(username) = &message.username else {
            continue;
        };
        users
            .entry(username.clone())
            .and_modify(|u| {
                u.first_seen = u.first_seen.min(message.ts);
                u.last_seen = u.last_seen.max(message.ts);
                u.message_count += 1;
            })
            .or_insert_with(|| User {
                username: username.clone(),
                first_seen: message.ts,
                last_seen: message.ts,
                conversations: vec![conversation_id.to_string()],
                message_count: 1,
            });
    }
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(username: &str, secs: i64) -> Message {
        let mut m = Message::new(
            MessageKind::Message,
            Utc.timestamp_opt(secs, 0).unwrap(),
            "hi".into(),
        );
        m.username = Some(username.to_string());
        m.conversation_id = "C01".into();
        m
    }

    #[test]
    fn user_aggregation_tracks_bounds_and_counts() {
        let messages = vec![msg("alice", 200), msg("bob", 100), msg("alice", 50)];
        let users = aggregate_users("C01", &messages);
        assert_eq!(users.len(), 2);
        let alice = &users["alice"];
        assert_eq!(alice.message_count, 2);
        assert_eq!(alice.first_seen.timestamp(), 50);
        assert_eq!(alice.last_seen.timestamp(), 200);
        assert_eq!(alice.conversations, ["C01"]);
    }

    #[test]
    fn messages_without_usernames_are_not_users() {
        let mut system = Message::new(
            MessageKind::System,
            Utc.timestamp_opt(10, 0).unwrap(),
            "renamed".into(),
        );
        system.conversation_id = "C01".into();
        let users = aggregate_users("C01", &[system]);
        assert!(users.is_empty());
    }

    #[test]
    fn mimetype_guessing() {
        assert_eq!(guess_mimetype("report.pdf"), "application/pdf");
        assert_eq!(guess_mimetype("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mimetype("weird.bin"), "application/octet-stream");
        assert_eq!(guess_mimetype("noextension"), "application/octet-stream");
    }

    #[test]
    fn estimate_counts_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.txt");
        fs::write(
            &path,
            "Channel ID: C01\n[2023-01-01 00:00:00 UTC] <a> x\n    :wave: b\n[2023-01-01 00:00:01 UTC] <b> y\n",
        )
        .unwrap();
        assert_eq!(estimate_message_lines(&path), 2);
    }

    #[test]
    fn stored_file_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let files = dir.path().join("files/F01");
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("report.pdf"), "x").unwrap();
        let (name, path) = find_stored_file(dir.path(), "F01").unwrap();
        assert_eq!(name, "report.pdf");
        assert!(path.ends_with("files/F01/report.pdf"));
        assert!(find_stored_file(dir.path(), "F99").is_none());
    }

    #[test]
    fn attachments_are_copied_into_storage() {
        let export = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let source = export.path().join("report.pdf");
        fs::write(&source, "content").unwrap();

        let dest = copy_to_storage(storage.path(), "F01", "report.pdf", &source);
        assert!(dest.is_file());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "content");
        // Re-runs reuse the stored copy.
        assert_eq!(
            copy_to_storage(storage.path(), "F01", "report.pdf", &source),
            dest
        );
    }
}
