//! Header-block parsing for export files.
//!
//! The block before the first `####…` separator carries conversation
//! metadata. Channels look like:
//!
//! ```text
//! Channel Name: #general
//! Channel ID: C01
//! Created: 2023-01-01 12:00:00 UTC by alice
//! Type: Channel
//! Topic: "standup notes", set on 2023-02-01 09:00:00 UTC by bob
//! Purpose: "daily chatter", set on 2023-02-01 09:00:00 UTC by bob
//! ```
//!
//! DMs replace the name line with `Private conversation between a, b`.
//! Absent fields are tolerated; `Channel ID` plus either a `Type:` field
//! or the private-conversation marker is enough to emit a conversation.

use super::timestamp::parse_timestamp;
use hindsight_core::{Conversation, ConversationKind, TopicEntry};

/// Parse the header block into a [`Conversation`].
///
/// `fallback_name` (the conversation's directory name) is used when the
/// header itself does not carry a name. Returns `None` when not even a
/// channel id can be recovered.
pub fn parse_header(lines: &[String], fallback_name: &str) -> Option<Conversation> {
    let mut id = None;
    let mut name = None;
    let mut kind = None;
    let mut created = None;
    let mut creator = None;
    let mut topic = None;
    let mut purpose = None;
    let mut members: Vec<String> = Vec::new();

    for line in lines {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Channel Name:") {
            name = Some(rest.trim().trim_start_matches('#').to_string());
        } else if let Some(rest) = line.strip_prefix("Channel ID:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                id = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("Created:") {
            // "Created: 2023-01-01 12:00:00 UTC by alice" (channels) or
            // "Created: 2023-07-11 21:17:07 UTC" (DMs)
            let rest = rest.trim();
            let (ts_part, by) = match rest.split_once(" by ") {
                Some((ts, by)) => (ts, Some(by.trim().to_string())),
                None => (rest, None),
            };
            created = parse_timestamp(ts_part, None);
            if creator.is_none() {
                creator = by;
            }
        } else if let Some(rest) = line.strip_prefix("Type:") {
            kind = ConversationKind::from_header(rest);
        } else if let Some(rest) = line.strip_prefix("Topic:") {
            topic = parse_topic_entry(rest);
        } else if let Some(rest) = line.strip_prefix("Purpose:") {
            purpose = parse_topic_entry(rest);
        } else if let Some(rest) = line.strip_prefix("Private conversation between ") {
            members = rest.split(", ").map(|u| u.trim().to_string()).collect();
        }
    }

    let id = id?;

    // Header Type wins; otherwise infer DMs from the member list and id
    // namespace (multi-party DMs live under `C…` ids in the export).
    let kind = kind.or_else(|| {
        if !members.is_empty() {
            if members.len() > 2 || id.starts_with('C') {
                Some(ConversationKind::MultiPartyDm)
            } else {
                Some(ConversationKind::DirectMessage)
            }
        } else {
            None
        }
    })?;

    let name = name.unwrap_or_else(|| {
        if members.is_empty() {
            fallback_name.to_string()
        } else {
            format!("DM: {}", members.join("-"))
        }
    });

    let mut conversation = Conversation::new(id, name, kind);
    conversation.created = created;
    conversation.members = members;
    if kind == ConversationKind::Channel {
        conversation.creator = creator;
    }
    conversation.topic = topic;
    conversation.purpose = purpose;
    Some(conversation)
}

/// Parse `"text", set on TS UTC by user` into a [`TopicEntry`].
fn parse_topic_entry(rest: &str) -> Option<TopicEntry> {
    let rest = rest.trim();
    let quoted_end = if rest.starts_with('"') {
        rest[1..].find('"').map(|i| i + 1)
    } else {
        None
    };

    let (text, tail) = match quoted_end {
        Some(end) => (&rest[1..end], &rest[end + 1..]),
        None => (rest, ""),
    };
    if text.is_empty() {
        return None;
    }

    let mut entry = TopicEntry {
        text: text.to_string(),
        set_by: None,
        set_at: None,
    };

    if let Some(set_info) = tail.trim_start_matches([',', ' ']).strip_prefix("set on ") {
        let (ts_part, by) = match set_info.split_once(" by ") {
            Some((ts, by)) => (ts, Some(by.trim().to_string())),
            None => (set_info, None),
        };
        entry.set_at = parse_timestamp(ts_part, None);
        entry.set_by = by;
    }

    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn channel_header() {
        let header = lines(&[
            "Channel Name: #general",
            "Channel ID: C01",
            "Created: 2023-01-01 12:00:00 UTC by alice",
            "Type: Channel",
            "Topic: \"standup notes\", set on 2023-02-01 09:00:00 UTC by bob",
            "Purpose: \"daily chatter\", set on 2023-02-01 09:00:00 UTC by bob",
        ]);
        let conv = parse_header(&header, "general").unwrap();
        assert_eq!(conv.id, "C01");
        assert_eq!(conv.name, "general");
        assert_eq!(conv.kind, ConversationKind::Channel);
        assert_eq!(conv.creator.as_deref(), Some("alice"));
        let topic = conv.topic.unwrap();
        assert_eq!(topic.text, "standup notes");
        assert_eq!(topic.set_by.as_deref(), Some("bob"));
        assert!(topic.set_at.is_some());
        assert_eq!(conv.purpose.unwrap().text, "daily chatter");
    }

    #[test]
    fn dm_header() {
        let header = lines(&[
            "Private conversation between alice, bob",
            "Channel ID: D02",
            "Created: 2023-07-11 21:17:07 UTC",
            "Type: Direct Message",
        ]);
        let conv = parse_header(&header, "alice-bob").unwrap();
        assert_eq!(conv.id, "D02");
        assert_eq!(conv.kind, ConversationKind::DirectMessage);
        assert_eq!(conv.members, ["alice", "bob"]);
        assert!(conv.creator.is_none());
    }

    #[test]
    fn multi_party_dm_inferred_from_members() {
        let header = lines(&[
            "Private conversation between alice, bob, carol",
            "Channel ID: C77",
        ]);
        let conv = parse_header(&header, "alice-bob-carol").unwrap();
        assert_eq!(conv.kind, ConversationKind::MultiPartyDm);
        assert_eq!(conv.name, "DM: alice-bob-carol");
    }

    #[test]
    fn missing_required_fields() {
        // No channel id at all
        assert!(parse_header(&lines(&["Channel Name: #x", "Type: Channel"]), "x").is_none());
        // Id but neither Type nor DM marker
        assert!(parse_header(&lines(&["Channel ID: C01"]), "x").is_none());
    }

    #[test]
    fn tolerates_absent_optional_fields() {
        let conv =
            parse_header(&lines(&["Channel ID: C05", "Type: Channel"]), "random-dir").unwrap();
        assert_eq!(conv.name, "random-dir");
        assert!(conv.created.is_none());
        assert!(conv.topic.is_none());
    }
}
