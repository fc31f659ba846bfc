//! View state machine and runtime for the Parley synchronization engine.
//!
//! This crate reconciles the two message-delivery paths (push channel and
//! directory pulls) into one consistent view. The pieces:
//!
//! - [`App`]: pure view state machine; consumes [`AppEvent`]s and commands,
//!   produces [`AppAction`]s, owns the materialized message list and the
//!   per-topic unread map.
//! - [`Runtime`]: async orchestration; executes actions against a
//!   [`parley_client::Directory`] and a [`parley_client::PushChannel`],
//!   serializing every state mutation onto one logical queue.
//! - [`search`]: pure projections of canonical state into displayed
//!   subsets.
//!
//! The state machine has no I/O dependencies, so every consistency rule
//! (scope matching, stale-fetch discarding, unread accounting) is testable
//! without a network or a runtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
mod app;
mod event;
mod runtime;
pub mod search;
mod state;

pub use action::AppAction;
pub use app::App;
pub use event::AppEvent;
pub use runtime::{Command, Runtime, RuntimeHandle};
pub use state::{FetchContext, Search, SearchMode, ViewMode};
