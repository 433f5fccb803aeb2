//! Tolerant parser for Slack's plain-text export dialect.
//!
//! An extracted export tree looks like:
//!
//! ```text
//! <root>/
//!   channels/<name>/<name>.txt
//!   dms/<user1-user2>/<user1-user2>.txt
//!   files/<file_id>/…
//!   huddle_transcripts/…  lists/…        (ignored)
//! ```
//!
//! [`ExportWalker`] discovers conversation files lazily and in sorted
//! order; [`parse_file`] turns one file into typed records. Parsing is
//! tolerant throughout: a line that matches no grammar becomes a
//! [`FailedImport`] and parsing continues, and an unreadable file becomes
//! a single whole-file failure. The indexer relies on emission order for
//! thread-reply attachment.

mod header;
mod line;
mod timestamp;

pub use line::{parse_message_line, parse_reaction, ParsedMessage};
pub use timestamp::{parse_date_header, parse_timestamp};

use hindsight_core::{Conversation, FailedImport, Message};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything recovered from one conversation file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub conversation: Option<Conversation>,
    pub messages: Vec<Message>,
    pub failures: Vec<FailedImport>,
}

/// File names and path fragments that are not conversation transcripts.
const SKIP_FILES: &[&str] = &["title.txt", "metadata.txt"];
const SKIP_FRAGMENTS: &[&str] = &[
    "canvas_in_the_conversation",
    "/shares/",
    "/canvases/",
    "/files/",
    "/huddle_transcripts/",
    "/lists/",
];

/// Walks an extracted export tree, yielding conversation transcript paths.
pub struct ExportWalker {
    files: std::vec::IntoIter<PathBuf>,
    total: usize,
}

impl ExportWalker {
    /// Discover conversation files under `extract_root`.
    ///
    /// The export content often sits one directory deeper (e.g.
    /// `slack-export-<team>-<ts>/`); the walker resolves that first.
    pub fn new(extract_root: &Path) -> std::io::Result<Self> {
        let root = resolve_export_root(extract_root)?;
        let mut files = Vec::new();
        for section in ["channels", "dms"] {
            let dir = root.join(section);
            if dir.is_dir() {
                collect_transcripts(&dir, &mut files)?;
            }
        }
        files.sort();
        let total = files.len();
        tracing::info!(
            root = %root.display(),
            files = total,
            "discovered conversation files"
        );
        Ok(Self {
            files: files.into_iter(),
            total,
        })
    }

    /// Number of conversation files discovered.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for ExportWalker {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        self.files.next()
    }
}

/// Resolve the actual export root, which may be one directory below the
/// extraction root.
pub(crate) fn resolve_export_root(extract_root: &Path) -> std::io::Result<PathBuf> {
    if extract_root.join("channels").is_dir() || extract_root.join("dms").is_dir() {
        return Ok(extract_root.to_path_buf());
    }
    let mut subdirs: Vec<PathBuf> = fs::read_dir(extract_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();
    // Prefer a directory that actually contains export sections, then
    // the conventional slack-export-* name.
    if let Some(dir) = subdirs
        .iter()
        .find(|d| d.join("channels").is_dir() || d.join("dms").is_dir())
    {
        return Ok(dir.clone());
    }
    if let Some(dir) = subdirs.iter().find(|d| {
        d.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("slack-export"))
    }) {
        return Ok(dir.clone());
    }
    Ok(extract_root.to_path_buf())
}

fn collect_transcripts(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_transcripts(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "txt") {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let as_str = path.to_string_lossy();
            if SKIP_FILES.contains(&name) || SKIP_FRAGMENTS.iter().any(|f| as_str.contains(f)) {
                continue;
            }
            out.push(path);
        }
    }
    Ok(())
}

/// Parse one conversation file.
///
/// Never fails: unreadable files and unmatched lines surface as
/// [`FailedImport`] records on the returned [`ParsedFile`].
pub fn parse_file(path: &Path) -> ParsedFile {
    let raw = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            return ParsedFile {
                conversation: None,
                messages: Vec::new(),
                failures: vec![FailedImport::for_file(path, format!("unreadable file: {e}"))],
            }
        }
    };

    let fallback_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    let mut parser = FileParser::new(path, fallback_name);
    for (idx, raw_line) in raw.lines().enumerate() {
        parser.feed(idx + 1, raw_line);
    }
    parser.finish()
}

#[derive(PartialEq)]
enum Phase {
    Header,
    AwaitMessages,
    Messages,
}

/// Line-by-line state machine over one transcript.
struct FileParser<'a> {
    path: &'a Path,
    fallback_name: &'a str,
    phase: Phase,
    header_lines: Vec<String>,
    current_date: Option<chrono::NaiveDate>,
    messages: Vec<Message>,
    failures: Vec<FailedImport>,
    /// Index of the last top-level message (thread parent).
    last_top: Option<usize>,
    /// Index of the last emitted message (reaction target).
    last_any: Option<usize>,
    /// Usernames already counted into the current parent's reply_users_count.
    reply_users: HashSet<String>,
    /// An id-form file share announced an indented text block.
    text_block_open: bool,
}

impl<'a> FileParser<'a> {
    fn new(path: &'a Path, fallback_name: &'a str) -> Self {
        Self {
            path,
            fallback_name,
            phase: Phase::Header,
            header_lines: Vec::new(),
            current_date: None,
            messages: Vec::new(),
            failures: Vec::new(),
            last_top: None,
            last_any: None,
            reply_users: HashSet::new(),
            text_block_open: false,
        }
    }

    fn feed(&mut self, line_number: usize, raw: &str) {
        let trimmed = raw.trim();
        match self.phase {
            Phase::Header => {
                if is_separator(trimmed) {
                    self.phase = Phase::AwaitMessages;
                } else if trimmed == "Messages:" {
                    self.phase = Phase::Messages;
                } else if !trimmed.is_empty() {
                    self.header_lines.push(trimmed.to_string());
                }
            }
            Phase::AwaitMessages => {
                if trimmed == "Messages:" {
                    self.phase = Phase::Messages;
                }
                // Anything between the separator and "Messages:" is noise.
            }
            Phase::Messages => self.feed_message_line(line_number, raw, trimmed),
        }
    }

    fn feed_message_line(&mut self, line_number: usize, raw: &str, trimmed: &str) {
        if trimmed.is_empty() {
            self.text_block_open = false;
            return;
        }

        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if indented {
            self.feed_indented(line_number, trimmed);
        } else {
            self.text_block_open = false;
            if let Some(date) = timestamp::parse_date_header(trimmed) {
                self.current_date = Some(date);
                return;
            }
            match self.parse_timestamped(trimmed) {
                Ok(parsed) => self.push_top_level(parsed),
                Err(reason) => self.fail(line_number, trimmed, reason),
            }
        }
    }

    fn feed_indented(&mut self, line_number: usize, trimmed: &str) {
        // Indented timestamped lines are thread replies on the preceding
        // top-level message.
        if trimmed.starts_with('[') && looks_timestamped(trimmed) {
            self.text_block_open = false;
            match self.parse_timestamped(trimmed) {
                Ok(parsed) => self.push_reply(line_number, trimmed, parsed),
                Err(reason) => self.fail(line_number, trimmed, reason),
            }
            return;
        }

        // A pending `with text:` block swallows indented lines until the
        // next blank line.
        if self.text_block_open {
            if let Some(idx) = self.last_any {
                let text = &mut self.messages[idx].text;
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(trimmed);
                return;
            }
        }

        if let Some(reaction) = line::parse_reaction(trimmed) {
            if let Some(idx) = self.last_any {
                self.messages[idx].reactions.push(reaction);
                return;
            }
            self.fail(line_number, trimmed, "reaction with no preceding message");
            return;
        }

        self.fail(line_number, trimmed, "no grammar matched");
    }

    /// Split the leading `[…]` token, resolve its timestamp, and parse the
    /// remaining content.
    fn parse_timestamped(&self, trimmed: &str) -> std::result::Result<ParsedMessage, String> {
        let Some(rest) = trimmed.strip_prefix('[') else {
            return Err("no grammar matched".to_string());
        };
        let Some(end) = rest.find(']') else {
            return Err("unterminated timestamp bracket".to_string());
        };
        let token = &rest[..end];
        let Some(ts) = timestamp::parse_timestamp(token, self.current_date) else {
            return Err(format!("unrecognised timestamp: [{token}]"));
        };
        line::parse_message_line(&rest[end + 1..], ts)
    }

    fn push_top_level(&mut self, parsed: ParsedMessage) {
        let idx = self.messages.len();
        self.messages.push(parsed.message);
        self.last_top = Some(idx);
        self.last_any = Some(idx);
        self.reply_users.clear();
        self.text_block_open = parsed.opens_text_block;
    }

    fn push_reply(&mut self, line_number: usize, trimmed: &str, parsed: ParsedMessage) {
        let Some(parent_idx) = self.last_top else {
            self.fail(line_number, trimmed, "thread reply with no parent");
            return;
        };
        let parent_ts = self.messages[parent_idx].ts;
        let mut message = parsed.message;
        message.thread_ts = Some(parent_ts);

        let parent = &mut self.messages[parent_idx];
        parent.reply_count += 1;
        if let Some(username) = &message.username {
            if self.reply_users.insert(username.clone()) {
                parent.reply_users_count += 1;
            }
        }

        let idx = self.messages.len();
        self.messages.push(message);
        self.last_any = Some(idx);
        self.text_block_open = false;
    }

    fn fail(&mut self, line_number: usize, line: &str, reason: impl Into<String>) {
        let failure = FailedImport::for_line(self.path, line_number, line, reason);
        tracing::debug!(
            file = %failure.file_path,
            line = line_number,
            error = %failure.error,
            "unparseable line"
        );
        self.failures.push(failure);
    }

    fn finish(mut self) -> ParsedFile {
        let conversation = header::parse_header(&self.header_lines, self.fallback_name);
        match &conversation {
            Some(conv) => {
                for (seq, message) in self.messages.iter_mut().enumerate() {
                    message.conversation_id = conv.id.clone();
                    message.seq = seq as u32;
                }
            }
            None if !self.messages.is_empty() => {
                self.failures.push(FailedImport::for_file(
                    self.path,
                    "header missing Channel ID or Type; messages dropped",
                ));
                self.messages.clear();
            }
            // Non-empty file that never reached a Messages section and
            // yielded no conversation either: not a transcript.
            None if self.phase == Phase::Header && !self.header_lines.is_empty() => {
                self.failures.push(FailedImport::for_file(
                    self.path,
                    "no message separator found; not a conversation transcript",
                ));
            }
            None => {}
        }
        ParsedFile {
            conversation,
            messages: self.messages,
            failures: self.failures,
        }
    }
}

fn is_separator(line: &str) -> bool {
    line.len() >= 4 && line.chars().all(|c| c == '#')
}

/// Quick check that a `[` line plausibly opens a timestamp, so reactions
/// like `:+1:` never reach the timestamp parser.
fn looks_timestamped(line: &str) -> bool {
    line[1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hindsight_core::{ConversationKind, MessageKind};
    use std::io::Write;

    const SEPARATOR: &str = "#################################################################";

    fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn channel_file(body: &str) -> String {
        format!(
            "Channel Name: #general\nChannel ID: C01\nCreated: 2023-01-01 12:00:00 UTC by alice\nType: Channel\n{SEPARATOR}\n\nMessages:\n\n{body}"
        )
    }

    #[test]
    fn channel_parse_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "channels/general/general.txt",
            &channel_file(
                "---- 2023-06-22 ----\n\
                 [2023-06-22 15:56:54 UTC] <alice> hello :wave:\n\
                \x20   :wave: bob\n\
                 [2023-06-22 15:57:10 UTC] bob joined the channel\n",
            ),
        );
        let parsed = parse_file(&path);
        assert!(parsed.failures.is_empty(), "{:?}", parsed.failures);

        let conv = parsed.conversation.unwrap();
        assert_eq!(conv.id, "C01");
        assert_eq!(conv.kind, ConversationKind::Channel);

        assert_eq!(parsed.messages.len(), 2);
        let first = &parsed.messages[0];
        assert_eq!(first.kind, MessageKind::Message);
        assert_eq!(first.text, "hello :wave:");
        assert_eq!(first.reactions.len(), 1);
        assert_eq!(first.reactions[0].emoji, "wave");
        assert_eq!(first.reactions[0].users, ["bob"]);
        assert_eq!(first.conversation_id, "C01");
        assert_eq!(first.seq, 0);

        let second = &parsed.messages[1];
        assert_eq!(second.kind, MessageKind::Join);
        assert_eq!(second.username.as_deref(), Some("bob"));
        assert_eq!(second.seq, 1);
    }

    #[test]
    fn dm_parse_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "dms/alice-bob/alice-bob.txt",
            &format!(
                "Private conversation between alice, bob\nChannel ID: D02\nCreated: 2023-07-11 21:17:07 UTC\nType: Direct Message\n{SEPARATOR}\n\nMessages:\n\n[2023-07-11 21:17:07 UTC] <alice> hi\n"
            ),
        );
        let parsed = parse_file(&path);
        let conv = parsed.conversation.unwrap();
        assert_eq!(conv.kind, ConversationKind::DirectMessage);
        assert_eq!(conv.members, ["alice", "bob"]);
        assert_eq!(parsed.messages.len(), 1);
    }

    #[test]
    fn short_timestamps_resolve_against_date_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "channels/general/general.txt",
            &channel_file("---- 2024-01-05 ----\n[8:24 AM] <carol> morning\n[14:30] <dave> afternoon\n"),
        );
        let parsed = parse_file(&path);
        assert!(parsed.failures.is_empty());
        assert_eq!(
            parsed.messages[0].ts.to_rfc3339(),
            "2024-01-05T08:24:00+00:00"
        );
        assert_eq!(
            parsed.messages[1].ts.to_rfc3339(),
            "2024-01-05T14:30:00+00:00"
        );
    }

    #[test]
    fn short_timestamp_without_date_header_fails_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "channels/general/general.txt",
            &channel_file("[8:24 AM] <carol> morning\n"),
        );
        let parsed = parse_file(&path);
        assert!(parsed.messages.is_empty());
        assert_eq!(parsed.failures.len(), 1);
        assert!(parsed.failures[0].error.contains("timestamp"));
    }

    #[test]
    fn thread_replies_attach_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "channels/general/general.txt",
            &channel_file(
                "[2023-06-22 15:56:54 UTC] <alice> release plan\n\
                \x20   [2023-06-22 15:58:00 UTC] <bob> lgtm\n\
                \x20   [2023-06-22 15:59:00 UTC] <carol> shipping\n\
                \x20   [2023-06-22 16:00:00 UTC] <bob> done\n",
            ),
        );
        let parsed = parse_file(&path);
        assert!(parsed.failures.is_empty(), "{:?}", parsed.failures);
        assert_eq!(parsed.messages.len(), 4);

        let parent = &parsed.messages[0];
        assert_eq!(parent.reply_count, 3);
        assert_eq!(parent.reply_users_count, 2);

        for reply in &parsed.messages[1..] {
            assert_eq!(reply.thread_ts, Some(parent.ts));
        }
    }

    #[test]
    fn file_share_text_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "channels/general/general.txt",
            &channel_file(
                "[2023-06-22 15:56:54 UTC] alice shared file(s) <F06ABC> with text:\n\
                \x20   quarterly numbers attached\n\
                \x20   please review by friday\n\
                \n\
                [2023-06-22 16:00:00 UTC] <bob> on it\n",
            ),
        );
        let parsed = parse_file(&path);
        assert!(parsed.failures.is_empty(), "{:?}", parsed.failures);
        assert_eq!(parsed.messages.len(), 2);

        let share = &parsed.messages[0];
        assert_eq!(share.kind, MessageKind::FileShare);
        assert_eq!(share.files[0].id.as_deref(), Some("F06ABC"));
        assert_eq!(
            share.text,
            "quarterly numbers attached\nplease review by friday"
        );
    }

    #[test]
    fn unmatched_lines_become_failed_imports() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "channels/general/general.txt",
            &channel_file("[2023-06-22 15:56:54 UTC] <alice> ok\ngarbage line here\n"),
        );
        let parsed = parse_file(&path);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.failures.len(), 1);
        assert!(parsed.failures[0].line_number > 0);
        assert_eq!(parsed.failures[0].line.as_deref(), Some("garbage line here"));
    }

    #[test]
    fn empty_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "channels/empty/empty.txt", "");
        let parsed = parse_file(&path);
        assert!(parsed.conversation.is_none());
        assert!(parsed.messages.is_empty());
        assert!(parsed.failures.is_empty());
    }

    #[test]
    fn missing_file_is_whole_file_failure() {
        let parsed = parse_file(Path::new("/nonexistent/general.txt"));
        assert_eq!(parsed.failures.len(), 1);
        assert_eq!(parsed.failures[0].line_number, -1);
    }

    #[test]
    fn walker_finds_transcripts_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        // Export nested one level deep, as real archives are.
        let root = dir.path().join("slack-export-acme-2023");
        write_file(&root, "channels/general/general.txt", "x");
        write_file(&root, "channels/random/random.txt", "x");
        write_file(&root, "channels/general/title.txt", "x");
        write_file(&root, "dms/alice-bob/alice-bob.txt", "x");
        write_file(&root, "files/F01/report.pdf.txt", "x");
        write_file(&root, "huddle_transcripts/h1.txt", "x");

        let walker = ExportWalker::new(dir.path()).unwrap();
        assert_eq!(walker.total(), 3);
        let names: Vec<String> = walker
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["general.txt", "random.txt", "alice-bob.txt"]);
    }
}
