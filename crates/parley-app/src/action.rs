//! Application side-effects and intents.
//!
//! [`AppAction`] is the set of instructions the [`crate::App`] state
//! machine produces for the runtime to execute. The state machine itself
//! performs no I/O.

use parley_client::{NewRoom, OutgoingMessage};
use parley_core::{RoomId, TopicId, TopicStatus, UserId};

use crate::FetchContext;

/// Actions produced by the App state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Notify the presentation layer that state changed.
    Render,

    /// Subscribe the push channel to a room, releasing the previous
    /// subscription first.
    Subscribe {
        /// Room to subscribe to.
        room_id: RoomId,
    },

    /// Fetch a history slice for the given context.
    FetchHistory {
        /// Context to fetch for and validate the result against.
        ctx: FetchContext,
    },

    /// Re-fetch the topic list of a room.
    RefreshTopics {
        /// Room whose topics to list.
        room_id: RoomId,
    },

    /// Create a topic.
    CreateTopic {
        /// Room the topic belongs to.
        room_id: RoomId,
        /// Topic title.
        title: String,
    },

    /// Set a topic's open/closed status.
    SetTopicStatus {
        /// Topic to update.
        topic_id: TopicId,
        /// Status to set.
        status: TopicStatus,
    },

    /// Publish a message on the push channel. The sender's view is updated
    /// only by the echoed event.
    PublishMessage {
        /// The outgoing message.
        message: OutgoingMessage,
    },

    /// Persist a message through the directory service, then re-fetch the
    /// given context. The offline send path.
    SendAndRefetch {
        /// The outgoing message.
        message: OutgoingMessage,
        /// Context to re-fetch after the send lands.
        ctx: FetchContext,
    },

    /// Create a group room.
    CreateRoom {
        /// Room parameters.
        room: NewRoom,
    },

    /// Open (or create) the direct room with another user.
    OpenPrivateRoom {
        /// The other participant.
        other_id: UserId,
    },

    /// Export a topic as an issue draft.
    ExportDraft {
        /// Room the topic belongs to.
        room_id: RoomId,
        /// Topic to export.
        topic_id: TopicId,
    },

    /// Load the session user's room list.
    LoadRooms,

    /// Load the user directory.
    LoadUsers,
}
