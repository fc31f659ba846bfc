//! Observable view state types.
//!
//! The small value types the [`crate::App`] state machine is built from:
//! display mode, search settings, and the context tag that every in-flight
//! history fetch carries.

use parley_core::{RoomId, TopicId};

/// What the selected room is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// The room's flat message stream.
    Chat,
    /// The room's topic list, or one selected topic.
    Topics,
}

/// Which message field a search query matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Case-insensitive substring match on message content.
    Message,
    /// Case-insensitive substring match on any tag.
    Tag,
}

/// Current search settings. An empty query matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    /// Query text; empty disables filtering.
    pub query: String,
    /// Field the query matches against.
    pub mode: SearchMode,
}

impl Search {
    /// No query, matching on content.
    pub fn empty() -> Self {
        Self { query: String::new(), mode: SearchMode::Message }
    }

    /// `true` when no filtering is active.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }
}

impl Default for Search {
    fn default() -> Self {
        Self::empty()
    }
}

/// Snapshot of the view context a history fetch was issued for.
///
/// Every in-flight fetch carries one; the result is applied only if the
/// context still equals [`crate::App::current_context`] at resolution time.
/// The generation counter increments on every issued fetch, so an explicit
/// refresh of an unchanged scope still invalidates earlier in-flight
/// results for that scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    /// Monotonic per-app fetch counter.
    pub generation: u64,
    /// Room the fetch targets.
    pub room_id: RoomId,
    /// Display mode at issue time.
    pub mode: ViewMode,
    /// Selected topic at issue time; `None` means the flat stream.
    pub topic_id: Option<TopicId>,
    /// Server-side tag filter at issue time (flat scope only).
    pub tag: Option<String>,
}
