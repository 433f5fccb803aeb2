//! Message-line grammar.
//!
//! Every message line opens with a bracketed timestamp; the grammars below
//! classify what follows it:
//!
//! ```text
//! <alice> hello there                          regular message
//! <alice> fixed the typo (edited)              regular, edited flag
//! bob joined the channel                       join
//! (channel_archive) <alice> {"text":"..."}     system, action tagged
//! (canvas_updated) <bot> {"canvas_id":"..."}   system, action tagged
//! <alice> shared a file: report.pdf            file share (named)
//! alice shared file(s) <F06ABC> with text:     file share (id + text block)
//! ```
//!
//! Indented `:emoji: user, user` lines are reactions on the preceding
//! message and are parsed by [`parse_reaction`].

use chrono::{DateTime, Utc};
use hindsight_core::{FileRef, Message, MessageKind, Reaction};

const EDITED_SUFFIX: &str = " (edited)";

/// A parsed message line.
#[derive(Debug)]
pub struct ParsedMessage {
    pub message: Message,
    /// The line announced an indented text block (`… with text:`) that the
    /// file parser should attach to this message.
    pub opens_text_block: bool,
}

/// Parse the content of a message line (everything after the leading
/// timestamp token).
///
/// Returns a description of why no grammar matched on failure; the caller
/// records that as a FailedImport.
pub fn parse_message_line(
    content: &str,
    ts: DateTime<Utc>,
) -> std::result::Result<ParsedMessage, String> {
    let content = content.trim();
    if content.is_empty() {
        return Err("empty message content".to_string());
    }

    // System payload: "(action) <user> {json…}"
    if content.starts_with('(') {
        return parse_system_payload(content, ts);
    }

    // Bracketed username: regular message or named file share
    if let Some(rest) = content.strip_prefix('<') {
        let Some(end) = rest.find('>') else {
            return Err("unterminated username bracket".to_string());
        };
        let username = rest[..end].trim().to_string();
        if username.is_empty() {
            return Err("empty username".to_string());
        }
        let body = rest[end + 1..].trim();

        if let Some(file_name) = body.strip_prefix("shared a file:") {
            let file_name = file_name.trim();
            let mut message = Message::new(MessageKind::FileShare, ts, file_name.to_string());
            message.username = Some(username);
            message.files.push(FileRef {
                id: None,
                name: Some(file_name.to_string()),
                mimetype: None,
            });
            return Ok(ParsedMessage {
                message,
                opens_text_block: false,
            });
        }

        let (text, is_edited) = strip_edited(body);
        let mut message = Message::new(MessageKind::Message, ts, text);
        message.username = Some(username);
        message.is_edited = is_edited;
        return Ok(ParsedMessage {
            message,
            opens_text_block: false,
        });
    }

    // Unbracketed username: join, id-form file share, or system line
    let Some((username, rest)) = content.split_once(' ') else {
        return Err("no grammar matched (single token)".to_string());
    };
    let username = username.trim();
    let rest = rest.trim();

    if rest == "joined the channel" {
        let mut message = Message::new(MessageKind::Join, ts, rest.to_string());
        message.username = Some(username.to_string());
        return Ok(ParsedMessage {
            message,
            opens_text_block: false,
        });
    }

    if let Some(share) = rest.strip_prefix("shared file(s) ") {
        return parse_file_share_ids(username, share, ts);
    }

    // Anything else in "user did-something" shape is a system message
    // tagged with its first word, matching the export's free-form system
    // lines ("alice archived the channel", "bot renamed the channel …").
    let action = rest.split_whitespace().next().unwrap_or_default();
    if action.is_empty() {
        return Err("no grammar matched".to_string());
    }
    let mut message = Message::new(MessageKind::System, ts, rest.to_string());
    message.username = Some(username.to_string());
    message.system_action = Some(action.to_string());
    Ok(ParsedMessage {
        message,
        opens_text_block: false,
    })
}

/// Parse `(action) <user> {json…}` system lines.
fn parse_system_payload(
    content: &str,
    ts: DateTime<Utc>,
) -> std::result::Result<ParsedMessage, String> {
    let Some(action_end) = content.find(')') else {
        return Err("unterminated system action".to_string());
    };
    let action = content[1..action_end].trim().to_string();
    if action.is_empty() {
        return Err("empty system action".to_string());
    }
    let rest = content[action_end + 1..].trim();

    let username = rest
        .strip_prefix('<')
        .and_then(|r| r.find('>').map(|end| r[..end].trim().to_string()))
        .filter(|u| !u.is_empty());

    let Some(json_start) = rest.find('{') else {
        return Err(format!("system line ({action}) has no JSON payload"));
    };
    let payload: serde_json::Value = serde_json::from_str(&rest[json_start..])
        .map_err(|e| format!("system line ({action}) has invalid JSON: {e}"))?;
    let text = payload
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    let kind = if action == "channel_archive" {
        MessageKind::Archive
    } else {
        MessageKind::System
    };
    let mut message = Message::new(kind, ts, text);
    message.username = username;
    message.system_action = Some(action);
    Ok(ParsedMessage {
        message,
        opens_text_block: false,
    })
}

/// Parse the tail of `user shared file(s) <FID> with text:`.
fn parse_file_share_ids(
    username: &str,
    share: &str,
    ts: DateTime<Utc>,
) -> std::result::Result<ParsedMessage, String> {
    let mut files = Vec::new();
    let mut remainder = share;
    while let Some(start) = remainder.find('<') {
        let Some(end) = remainder[start..].find('>') else {
            return Err("unterminated file id bracket".to_string());
        };
        let id = remainder[start + 1..start + end].trim();
        if !id.is_empty() {
            files.push(FileRef {
                id: Some(id.to_string()),
                name: None,
                mimetype: None,
            });
        }
        remainder = &remainder[start + end + 1..];
    }
    if files.is_empty() {
        return Err("file share line carries no file id".to_string());
    }

    let opens_text_block = share.trim_end().ends_with("with text:");
    let mut message = Message::new(MessageKind::FileShare, ts, String::new());
    message.username = Some(username.to_string());
    message.files = files;
    Ok(ParsedMessage {
        message,
        opens_text_block,
    })
}

/// Strip a trailing ` (edited)` marker.
fn strip_edited(text: &str) -> (String, bool) {
    match text.strip_suffix(EDITED_SUFFIX) {
        Some(stripped) => (stripped.trim_end().to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Parse an indented reaction line: `:emoji: user1, user2`.
pub fn parse_reaction(line: &str) -> Option<Reaction> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix(':')?;
    let end = rest.find(':')?;
    let emoji = rest[..end].trim();
    if emoji.is_empty() || emoji.contains(char::is_whitespace) {
        return None;
    }
    let users: Vec<String> = rest[end + 1..]
        .split(',')
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if users.is_empty() {
        return None;
    }
    Some(Reaction {
        emoji: emoji.to_string(),
        users,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 22, 15, 56, 54).unwrap()
    }

    #[test]
    fn regular_message() {
        let parsed = parse_message_line("<alice> hello :wave:", ts()).unwrap();
        let m = parsed.message;
        assert_eq!(m.kind, MessageKind::Message);
        assert_eq!(m.username.as_deref(), Some("alice"));
        assert_eq!(m.text, "hello :wave:");
        assert!(!m.is_edited);
    }

    #[test]
    fn edited_marker_is_stripped() {
        let parsed = parse_message_line("<alice> fixed the typo (edited)", ts()).unwrap();
        assert_eq!(parsed.message.text, "fixed the typo");
        assert!(parsed.message.is_edited);
    }

    #[test]
    fn inner_brackets_are_preserved() {
        let parsed =
            parse_message_line("<alice> as bob said: [8:53 AM] we ship friday", ts()).unwrap();
        assert_eq!(parsed.message.text, "as bob said: [8:53 AM] we ship friday");
    }

    #[test]
    fn join_message() {
        let parsed = parse_message_line("bob joined the channel", ts()).unwrap();
        assert_eq!(parsed.message.kind, MessageKind::Join);
        assert_eq!(parsed.message.username.as_deref(), Some("bob"));
    }

    #[test]
    fn archive_message() {
        let parsed = parse_message_line(
            r#"(channel_archive) <alice> {"user":"U1","text":"archived the channel"}"#,
            ts(),
        )
        .unwrap();
        let m = parsed.message;
        assert_eq!(m.kind, MessageKind::Archive);
        assert_eq!(m.system_action.as_deref(), Some("channel_archive"));
        assert_eq!(m.username.as_deref(), Some("alice"));
        assert_eq!(m.text, "archived the channel");
    }

    #[test]
    fn canvas_update_is_tagged_system() {
        let parsed = parse_message_line(
            r#"(canvas_updated) <clippy> {"canvas_id":"F07"}"#,
            ts(),
        )
        .unwrap();
        assert_eq!(parsed.message.kind, MessageKind::System);
        assert_eq!(
            parsed.message.system_action.as_deref(),
            Some("canvas_updated")
        );
    }

    #[test]
    fn system_payload_with_bad_json_is_an_error() {
        assert!(parse_message_line("(channel_archive) <alice> {not json", ts()).is_err());
    }

    #[test]
    fn named_file_share() {
        let parsed = parse_message_line("<alice> shared a file: report.pdf", ts()).unwrap();
        let m = parsed.message;
        assert_eq!(m.kind, MessageKind::FileShare);
        assert_eq!(m.text, "report.pdf");
        assert_eq!(m.files[0].name.as_deref(), Some("report.pdf"));
        assert!(!parsed.opens_text_block);
    }

    #[test]
    fn id_file_share_opens_text_block() {
        let parsed =
            parse_message_line("alice shared file(s) <F06ABC> with text:", ts()).unwrap();
        let m = &parsed.message;
        assert_eq!(m.kind, MessageKind::FileShare);
        assert_eq!(m.files[0].id.as_deref(), Some("F06ABC"));
        assert!(parsed.opens_text_block);
    }

    #[test]
    fn free_form_system_line() {
        let parsed = parse_message_line("alice archived the channel", ts()).unwrap();
        assert_eq!(parsed.message.kind, MessageKind::System);
        assert_eq!(parsed.message.system_action.as_deref(), Some("archived"));
    }

    #[test]
    fn unmatched_lines_are_errors() {
        assert!(parse_message_line("", ts()).is_err());
        assert!(parse_message_line("justoneword", ts()).is_err());
        assert!(parse_message_line("<> empty user", ts()).is_err());
        assert!(parse_message_line("<alice no closing bracket", ts()).is_err());
    }

    #[test]
    fn reaction_lines() {
        let r = parse_reaction("    :wave: bob").unwrap();
        assert_eq!(r.emoji, "wave");
        assert_eq!(r.users, ["bob"]);

        let r = parse_reaction("    :+1: alice, bob, carol").unwrap();
        assert_eq!(r.emoji, "+1");
        assert_eq!(r.users.len(), 3);

        assert!(parse_reaction("not a reaction").is_none());
        assert!(parse_reaction("    :emoji with space: bob").is_none());
        assert!(parse_reaction("    :lonely:").is_none());
    }
}
