//! Core types and shared logic for the Hindsight ingestion pipeline.
//!
//! This crate provides:
//! - The data model for conversations, messages, users, and import jobs
//! - The job lifecycle state machine and its transition table
//! - Environment-driven configuration
//! - Score fusion for hybrid (lexical + semantic) search ranking
//! - Shared error types

pub mod config;
mod error;
pub mod model;
pub mod rank;
pub mod status;

/// Embedding dimensionality of the `nomic-embed-text` model. The indexer
/// asserts every batch against this before writing vectors.
pub const EMBEDDING_DIM: usize = 768;

/// Default embedding model requested from the Ollama endpoint.
pub const EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Maximum characters of message text carried into vector-store metadata.
pub const SNIPPET_MAX_CHARS: usize = 512;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{
    Conversation, ConversationKind, FailedImport, FileRef, Job, Message, MessageKind, Reaction,
    TopicEntry, User,
};
pub use status::{JobStatus, Stage};

/// Truncate text to at most `max` characters on a char boundary.
///
/// Used for vector-store metadata snippets, which are capped so that
/// metadata stays small regardless of message size.
pub fn snippet(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_short_text_is_unchanged() {
        assert_eq!(snippet("hello", 512), "hello");
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let text = "héllo wörld".repeat(100);
        let s = snippet(&text, 512);
        assert_eq!(s.chars().count(), 512);
        assert!(text.starts_with(&s));
    }
}
