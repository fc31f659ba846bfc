//! Core types for the Parley synchronization engine.
//!
//! Shared vocabulary for the client crates: the chat data model (rooms,
//! topics, messages, users), the error taxonomy every layer maps into, and
//! the session context that carries the authenticated identity.
//!
//! This crate holds no I/O. Transports live in `parley-client`, the view
//! state machine in `parley-app`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod model;
mod session;

pub use error::SyncError;
pub use model::{
    IssueDraft, Message, MessageId, Room, RoomId, Topic, TopicId, TopicStatus, User, UserId,
};
pub use session::{Session, SessionHandle};
