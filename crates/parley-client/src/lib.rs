//! Transports for the Parley synchronization engine.
//!
//! Two independent message-delivery paths:
//!
//! - [`Directory`]: request/response client for the directory service
//!   (rooms, users, topics, message history, sends). Implemented over HTTP
//!   by [`HttpDirectory`] and in-memory by [`MemoryDirectory`].
//! - [`PushChannel`]: persistent, auto-reconnecting subscription delivering
//!   live room events. Implemented over WebSocket by [`WsPushChannel`] and
//!   in-process by [`PairPushChannel`].
//!
//! Neither transport owns view state. Reconciling the two paths is the job
//! of `parley-app`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod directory;
mod http;
mod memory;
mod push;

pub use directory::{Directory, DirectoryError, HistoryFilter, NewRoom, OutgoingMessage};
pub use http::HttpDirectory;
pub use memory::MemoryDirectory;
pub use push::{PairPushChannel, PushChannel, PushError, PushEvent, PushProbe, Subscription, WsPushChannel};
