//! Error taxonomy for the synchronization engine.
//!
//! Every failure a transport can produce maps into one of these classes
//! before it reaches the view state machine. Nothing here is fatal to the
//! process; all failures are recoverable by a subsequent user action.
//!
//! Stale fetch results are deliberately absent: a resolved fetch that no
//! longer matches the current view context is discarded by context
//! comparison, not reported as an error.

use thiserror::Error;

/// Classified failure surfaced to the view state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network or server failure on a read. Logged; the view keeps its
    /// last-known-good data and no automatic retry is scheduled.
    #[error("history fetch failed: {0}")]
    TransientFetch(String),

    /// A mutation (create/toggle topic, send, create room) was refused.
    /// Surfaced to the caller as a failed operation; no local state change.
    #[error("operation rejected: {0}")]
    MutationRejected(String),

    /// The session is no longer valid (401/403 from any directory call).
    /// Session-wide: clears credentials and forces re-authentication
    /// regardless of which call tripped it.
    #[error("session expired")]
    AuthExpired,
}

impl SyncError {
    /// `true` when the failure invalidates the whole session rather than a
    /// single operation.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}
