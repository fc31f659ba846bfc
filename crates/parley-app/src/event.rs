//! Application input events.
//!
//! [`AppEvent`] is the full set of inputs that drive the [`crate::App`]
//! state machine. Events originate from three sources: the push channel
//! (live messages, connectivity changes), resolved directory calls posted
//! back by the runtime, and nothing else. User interactions enter through
//! the `App` command methods directly, not as events.

use parley_core::{IssueDraft, Message, Room, RoomId, SyncError, Topic, User};

use crate::FetchContext;

/// Events processed by the App state machine.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A live message was delivered on the room subscription.
    MessageArrived {
        /// The delivered message; topic scope is carried inside it.
        message: Message,
    },

    /// The push channel came up (initially or after a reconnect). Events
    /// may have been missed, so the current scope must be re-fetched.
    ChannelConnected,

    /// The push channel dropped.
    ChannelDisconnected,

    /// A history fetch resolved.
    HistoryLoaded {
        /// Context the fetch was issued for.
        ctx: FetchContext,
        /// The fetched slice, in send order.
        messages: Vec<Message>,
    },

    /// A history fetch failed.
    HistoryFailed {
        /// Context the fetch was issued for.
        ctx: FetchContext,
        /// Classified failure.
        error: SyncError,
    },

    /// The topic list for a room resolved.
    TopicsLoaded {
        /// Room the listing belongs to.
        room_id: RoomId,
        /// All topics of the room.
        topics: Vec<Topic>,
    },

    /// A topic was created.
    TopicCreated {
        /// Room the topic belongs to.
        room_id: RoomId,
        /// The new topic.
        topic: Topic,
    },

    /// A topic's open/closed status was toggled.
    TopicStatusChanged {
        /// The updated topic.
        topic: Topic,
    },

    /// The session user's room list resolved.
    RoomsLoaded {
        /// All visible rooms.
        rooms: Vec<Room>,
    },

    /// The user directory resolved.
    UsersLoaded {
        /// All known users.
        users: Vec<User>,
    },

    /// A room was created or a direct room was opened.
    RoomOpened {
        /// The room to switch to.
        room: Room,
    },

    /// A topic export resolved.
    DraftExported {
        /// The produced draft.
        draft: IssueDraft,
    },

    /// A directory mutation or listing failed.
    OperationFailed {
        /// Human-readable name of the failed operation.
        operation: &'static str,
        /// Classified failure.
        error: SyncError,
    },
}
