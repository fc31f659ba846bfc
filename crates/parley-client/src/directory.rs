//! Directory service client interface.
//!
//! The directory service owns rooms, users, topics, and the message store.
//! This module defines the trait the sync engine programs against, the
//! request types, and the transport error classification. Concrete
//! implementations live in [`crate::http`] and [`crate::memory`].

use async_trait::async_trait;
use parley_core::{
    IssueDraft, Message, Room, RoomId, SyncError, Topic, TopicId, TopicStatus, User, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure from a directory call, classified at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// 401/403: the session is no longer valid.
    #[error("unauthorized")]
    AuthExpired,

    /// The server refused the request (validation, closed topic, mismatched
    /// room, and similar).
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code, or a synthetic one for non-HTTP backends.
        status: u16,
        /// Server-provided reason, possibly empty.
        message: String,
    },

    /// Network failure or malformed response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DirectoryError {
    /// Classify this failure as a read error (history, listings).
    pub fn into_read_error(self) -> SyncError {
        match self {
            Self::AuthExpired => SyncError::AuthExpired,
            Self::Rejected { message, .. } => SyncError::TransientFetch(message),
            Self::Transport(message) => SyncError::TransientFetch(message),
        }
    }

    /// Classify this failure as a mutation error (create, toggle, send).
    pub fn into_mutation_error(self) -> SyncError {
        match self {
            Self::AuthExpired => SyncError::AuthExpired,
            Self::Rejected { message, .. } => SyncError::MutationRejected(message),
            Self::Transport(message) => SyncError::MutationRejected(message),
        }
    }
}

/// Parameters for a history read.
///
/// `topic_id` and `tag` are mutually exclusive: topic history is never
/// tag-filtered server-side. Constructors enforce this; the struct is
/// non-exhaustive to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Restrict to one topic. `None` reads the flat room stream.
    pub topic_id: Option<TopicId>,
    /// Server-side tag filter for the flat stream.
    pub tag: Option<String>,
}

impl HistoryFilter {
    /// The room's flat stream, unfiltered.
    pub fn flat() -> Self {
        Self::default()
    }

    /// One topic's history.
    pub fn topic(topic_id: TopicId) -> Self {
        Self { topic_id: Some(topic_id), tag: None }
    }

    /// The flat stream narrowed by tag, filtered server-side.
    pub fn tagged(tag: String) -> Self {
        Self { topic_id: None, tag: Some(tag) }
    }
}

/// Request body for creating a group room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    /// Display name.
    pub name: String,
    /// User creating the room.
    pub creator_id: UserId,
    /// Initial members, excluding the creator.
    pub member_ids: Vec<UserId>,
}

/// Request body for sending a message, on either transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Author; always the session user.
    pub from_user_id: UserId,
    /// Destination room.
    pub room_id: RoomId,
    /// Message body, already trimmed.
    pub content: String,
    /// Tags attached by the author.
    pub tags: Vec<String>,
    /// Topic scope; `None` targets the flat stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<TopicId>,
}

/// Read/write operations on the directory service.
///
/// All methods are scoped by the caller's session; an unauthorized response
/// on any of them surfaces as [`DirectoryError::AuthExpired`].
#[async_trait]
pub trait Directory: Send + Sync {
    /// All known users.
    async fn list_users(&self) -> Result<Vec<User>, DirectoryError>;

    /// Rooms visible to `user_id`, direct rooms included.
    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<Room>, DirectoryError>;

    /// Create a group room.
    async fn create_room(&self, room: NewRoom) -> Result<Room, DirectoryError>;

    /// Fetch the one-to-one room between two users, creating it on first
    /// use. Both arguments are canonical [`UserId`]s; passing any other
    /// identifier kind is a caller contract violation.
    async fn private_room(
        &self,
        user_id: &UserId,
        other_id: &UserId,
    ) -> Result<Room, DirectoryError>;

    /// Topics of a room, optionally narrowed to one status server-side.
    async fn list_topics(
        &self,
        room_id: &RoomId,
        status: Option<TopicStatus>,
    ) -> Result<Vec<Topic>, DirectoryError>;

    /// Create a topic in a room.
    async fn create_topic(&self, room_id: &RoomId, title: &str) -> Result<Topic, DirectoryError>;

    /// Close an open topic. Returns the updated topic.
    async fn close_topic(&self, topic_id: &TopicId) -> Result<Topic, DirectoryError>;

    /// Reopen a closed topic. Returns the updated topic.
    async fn reopen_topic(&self, topic_id: &TopicId) -> Result<Topic, DirectoryError>;

    /// A history slice for one scope of a room, in send order.
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        filter: &HistoryFilter,
    ) -> Result<Vec<Message>, DirectoryError>;

    /// Persist a message. The slow path: used when the push channel is
    /// down, always followed by a re-fetch of the current scope.
    async fn send_message(
        &self,
        room_id: &RoomId,
        message: OutgoingMessage,
    ) -> Result<Message, DirectoryError>;

    /// Issue-style export of a topic's conversation.
    async fn export_draft(
        &self,
        room_id: &RoomId,
        topic_id: &TopicId,
    ) -> Result<IssueDraft, DirectoryError>;
}
