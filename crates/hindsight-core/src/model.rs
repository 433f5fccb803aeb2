//! Data model for the ingested corpus.
//!
//! The Slack export represents messages as loosely-typed maps whose fields
//! vary by kind. Here every record is a typed struct with a tagged
//! [`MessageKind`]; the tag is preserved in the store's `type` field.
//! `username` and `ts` are the single canonical fields for their concepts;
//! views project them as needed but nothing persists duplicates.

use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingestion run, from uploaded archive to queryable index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job id (ObjectId hex), assigned at upload.
    pub id: String,

    /// Original archive filename.
    pub filename: String,

    /// Archive size in bytes.
    pub size: i64,

    /// On-disk path of the staged archive.
    pub upload_path: Option<String>,

    /// On-disk path of the extracted tree; set once EXTRACTED is reached
    /// and preserved across ERROR/CANCELLED so the job can resume.
    pub extract_path: Option<String>,

    pub status: JobStatus,

    /// Name of the active stage, mirroring `status` for active stages.
    pub current_stage: Option<String>,

    /// Progress within the current stage, 0–100.
    pub stage_progress: u8,

    /// Human-readable progress line.
    pub progress: String,

    /// Overall progress, 0–100, monotone across stages.
    pub progress_percent: u8,

    /// Error description, present only when status is ERROR.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of a conversation in the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Channel,
    DirectMessage,
    MultiPartyDm,
    PhoneCall,
}

impl ConversationKind {
    /// Parse the `Type:` header field from an export file.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim() {
            "Channel" => Some(Self::Channel),
            "Direct Message" => Some(Self::DirectMessage),
            "Multi-Party Direct Message" => Some(Self::MultiPartyDm),
            "Phone Call" => Some(Self::PhoneCall),
            _ => None,
        }
    }
}

/// A topic or purpose entry with its setter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub text: String,
    pub set_by: Option<String>,
    pub set_at: Option<DateTime<Utc>>,
}

/// A channel, direct-message pair, or multi-party DM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Channel id from the export (`C…` for channels and multi-party DMs,
    /// `D…` for DMs). Unique; the kind is immutable after creation.
    pub id: String,

    pub name: String,
    pub kind: ConversationKind,
    pub created: Option<DateTime<Utc>>,

    /// Creator username; channels only.
    pub creator: Option<String>,

    pub topic: Option<TopicEntry>,
    pub purpose: Option<TopicEntry>,

    pub is_archived: bool,
    pub archived_by: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,

    /// Member usernames; DMs only.
    pub members: Vec<String>,
}

impl Conversation {
    pub fn new(id: String, name: String, kind: ConversationKind) -> Self {
        Self {
            id,
            name,
            kind,
            created: None,
            creator: None,
            topic: None,
            purpose: None,
            is_archived: false,
            archived_by: None,
            archived_at: None,
            members: Vec::new(),
        }
    }
}

/// Kind of an ingested message. The store serialises the tag in `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Join,
    Archive,
    FileShare,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Join => "join",
            MessageKind::Archive => "archive",
            MessageKind::FileShare => "file_share",
            MessageKind::System => "system",
        }
    }
}

/// One emoji reaction and the users who added it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub users: Vec<String>,
}

/// Metadata for a file referenced by a file-share message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// File id from the export, when the share line carried one.
    pub id: Option<String>,
    pub name: Option<String>,
    pub mimetype: Option<String>,
}

/// A single ingested message.
///
/// Identity is (conversation_id, ts, seq): the timestamp alone is not
/// unique because system messages can collide, so `seq` carries the
/// ingestion ordinal within the source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: String,
    pub seq: u32,

    /// Sender username. Present for `message` and `file_share`; may be
    /// absent for other kinds.
    pub username: Option<String>,

    pub text: String,

    /// Message timestamp, always UTC.
    pub ts: DateTime<Utc>,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    pub is_edited: bool,
    pub reactions: Vec<Reaction>,
    pub files: Vec<FileRef>,

    /// Parent timestamp for thread replies. No foreign key: orphans are
    /// tolerated so partial exports still import.
    pub thread_ts: Option<DateTime<Utc>>,
    pub reply_count: u32,
    pub reply_users_count: u32,

    /// Action tag for system messages (e.g. `channel_archive`).
    pub system_action: Option<String>,
}

impl Message {
    pub fn new(kind: MessageKind, ts: DateTime<Utc>, text: String) -> Self {
        Self {
            conversation_id: String::new(),
            seq: 0,
            username: None,
            text,
            ts,
            kind,
            is_edited: false,
            reactions: Vec::new(),
            files: Vec::new(),
            thread_ts: None,
            reply_count: 0,
            reply_users_count: 0,
            system_action: None,
        }
    }
}

/// Aggregate record for a username seen in the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub conversations: Vec<String>,
    pub message_count: u64,
}

/// A parse or write failure that did not abort the job.
///
/// `line_number` is 1-based; `-1` means the failure covered the whole file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedImport {
    pub job_id: Option<String>,
    pub file_path: String,
    pub line_number: i64,
    pub line: Option<String>,
    pub error: String,
    pub captured_at: DateTime<Utc>,
}

impl FailedImport {
    pub fn for_line(file_path: &std::path::Path, line_number: usize, line: &str, error: impl Into<String>) -> Self {
        Self {
            job_id: None,
            file_path: file_path.display().to_string(),
            line_number: line_number as i64,
            line: Some(line.to_string()),
            error: error.into(),
            captured_at: Utc::now(),
        }
    }

    pub fn for_file(file_path: &std::path::Path, error: impl Into<String>) -> Self {
        Self {
            job_id: None,
            file_path: file_path.display().to_string(),
            line_number: -1,
            line: None,
            error: error.into(),
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_kind_from_header() {
        assert_eq!(
            ConversationKind::from_header("Channel"),
            Some(ConversationKind::Channel)
        );
        assert_eq!(
            ConversationKind::from_header(" Direct Message "),
            Some(ConversationKind::DirectMessage)
        );
        assert_eq!(
            ConversationKind::from_header("Multi-Party Direct Message"),
            Some(ConversationKind::MultiPartyDm)
        );
        assert_eq!(ConversationKind::from_header("Huddle"), None);
    }

    #[test]
    fn message_kind_tag_matches_store_representation() {
        let msg = Message::new(MessageKind::FileShare, Utc::now(), "report.pdf".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "file_share");
    }

    #[test]
    fn failed_import_line_numbers() {
        let path = std::path::Path::new("channels/general/general.txt");
        let per_line = FailedImport::for_line(path, 12, "garbage", "no grammar matched");
        assert_eq!(per_line.line_number, 12);
        let whole_file = FailedImport::for_file(path, "unreadable");
        assert_eq!(whole_file.line_number, -1);
        assert!(whole_file.line.is_none());
    }
}
