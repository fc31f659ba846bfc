//! Chat data model.
//!
//! Wire types shared by both transports. Field casing on the wire is
//! camelCase, matching the directory service's JSON. All types are owned by
//! the directory service; the client holds read-only cached copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Room identifier, assigned by the directory service.
pub type RoomId = String;

/// Topic identifier, assigned by the directory service.
pub type TopicId = String;

/// User identifier, assigned by the directory service.
///
/// This is the only user identifier in the model. Callers must not substitute
/// other identifier kinds (usernames, display handles) where a `UserId` is
/// expected.
pub type UserId = String;

/// Message identifier, assigned by the directory service.
pub type MessageId = String;

/// Tag name reserved for diagnostics; hidden from presentation.
const DEBUG_TAG: &str = "debug";

/// A persistent conversation container: either a group room or a one-to-one
/// direct chat.
///
/// Rooms are fetched once per session and appended to locally on creation;
/// never mutated otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// `true` for one-to-one chats, `false` for group rooms.
    pub direct: bool,
}

/// Lifecycle status of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicStatus {
    /// Accepting new messages.
    Open,
    /// Sends into this topic are rejected.
    Closed,
}

impl TopicStatus {
    /// The opposite status, for open/close toggling.
    pub fn toggled(self) -> Self {
        match self {
            Self::Open => Self::Closed,
            Self::Closed => Self::Open,
        }
    }
}

/// A named, status-tracked sub-thread inside a non-direct room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Topic identifier.
    pub id: TopicId,
    /// Title shown in the topic list.
    pub title: String,
    /// Open/closed lifecycle status.
    pub status: TopicStatus,
    /// Number of messages filed under this topic.
    #[serde(default)]
    pub message_count: u64,
    /// Timestamp of the most recent message, if any.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Topic {
    /// `true` when sends into this topic must be rejected.
    pub fn is_closed(&self) -> bool {
        self.status == TopicStatus::Closed
    }
}

/// An immutable chat message.
///
/// A message belongs to exactly one scope: the room's flat stream when
/// `topic_id` is `None`, otherwise exactly one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Author.
    pub from_user_id: UserId,
    /// Room this message belongs to.
    pub room_id: RoomId,
    /// Topic scope; `None` means the room's flat stream.
    #[serde(default)]
    pub topic_id: Option<TopicId>,
    /// Message body.
    pub content: String,
    /// Ordered tags. May contain the reserved `"debug"` tag, which is
    /// excluded from [`Message::display_tags`].
    #[serde(default)]
    pub tags: Vec<String>,
    /// Server-assigned send timestamp.
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Tags for presentation, preserving order, with the reserved debug tag
    /// hidden regardless of letter case.
    pub fn display_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str).filter(|t| !t.eq_ignore_ascii_case(DEBUG_TAG))
    }
}

/// A directory user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Optional given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Optional family name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Presence flag maintained by the directory service.
    #[serde(default)]
    pub online: bool,
}

/// Issue-style export of a topic, produced on demand by the directory
/// service. Read-only; not part of the sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    /// Draft title.
    pub title: String,
    /// Draft body text.
    pub body: String,
    /// Suggested labels.
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_tags(tags: &[&str]) -> Message {
        Message {
            id: "m1".into(),
            from_user_id: "u1".into(),
            room_id: "r1".into(),
            topic_id: None,
            content: "hello".into(),
            tags: tags.iter().map(ToString::to_string).collect(),
            sent_at: None,
        }
    }

    #[test]
    fn display_tags_hides_debug_any_case() {
        let msg = message_with_tags(&["infra", "Debug", "DEBUG", "debug", "ux"]);
        let shown: Vec<&str> = msg.display_tags().collect();
        assert_eq!(shown, vec!["infra", "ux"]);
    }

    #[test]
    fn display_tags_preserves_order() {
        let msg = message_with_tags(&["b", "a", "c"]);
        let shown: Vec<&str> = msg.display_tags().collect();
        assert_eq!(shown, vec!["b", "a", "c"]);
    }

    #[test]
    fn topic_status_round_trips_screaming_snake() {
        let json = serde_json::to_string(&TopicStatus::Closed).unwrap();
        assert_eq!(json, "\"CLOSED\"");
        let status: TopicStatus = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(status, TopicStatus::Open);
    }

    #[test]
    fn message_deserializes_camel_case_wire_form() {
        let msg: Message = serde_json::from_str(
            r#"{
                "id": "m9",
                "fromUserId": "u2",
                "roomId": "r7",
                "topicId": "t1",
                "content": "x",
                "tags": ["bug"],
                "sentAt": "2025-01-03T10:15:30Z"
            }"#,
        )
        .unwrap();
        assert_eq!(msg.topic_id.as_deref(), Some("t1"));
        assert!(msg.sent_at.is_some());
    }

    #[test]
    fn message_tolerates_missing_optional_fields() {
        let msg: Message = serde_json::from_str(
            r#"{"id": "m1", "fromUserId": "u1", "roomId": "r1", "content": "hi"}"#,
        )
        .unwrap();
        assert!(msg.topic_id.is_none());
        assert!(msg.tags.is_empty());
        assert!(msg.sent_at.is_none());
    }

    #[test]
    fn toggled_flips_status() {
        assert_eq!(TopicStatus::Open.toggled(), TopicStatus::Closed);
        assert_eq!(TopicStatus::Closed.toggled(), TopicStatus::Open);
    }
}
