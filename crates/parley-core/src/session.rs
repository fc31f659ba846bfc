//! Authenticated session context.
//!
//! The session is an explicitly passed dependency, not ambient storage:
//! components that need identity or credentials receive a [`SessionHandle`]
//! at construction. Invalidation (logout, 401/403) is an explicit observer
//! registration rather than an out-of-band broadcast; interested parties
//! subscribe deliberately via [`SessionHandle::subscribe_invalidated`].

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{User, UserId};

/// Credentials and identity established at login.
#[derive(Debug, Clone)]
pub struct Session {
    /// The authenticated user. Stamps outgoing messages and scopes queries.
    pub user: User,
    /// Bearer token presented on every directory call.
    pub token: String,
}

/// Shared handle to a live session.
///
/// Cheap to clone; all clones observe the same invalidation state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    session: Session,
    invalidated: watch::Sender<bool>,
}

impl SessionHandle {
    /// Wrap a freshly authenticated session.
    pub fn new(session: Session) -> Self {
        let (invalidated, _) = watch::channel(false);
        Self { inner: Arc::new(Inner { session, invalidated }) }
    }

    /// The authenticated user.
    pub fn user(&self) -> &User {
        &self.inner.session.user
    }

    /// The authenticated user's identifier.
    pub fn user_id(&self) -> &UserId {
        &self.inner.session.user.id
    }

    /// Bearer token for outgoing directory calls.
    pub fn token(&self) -> &str {
        &self.inner.session.token
    }

    /// Mark the session invalid and notify every subscriber.
    ///
    /// Idempotent: repeated calls do not re-notify.
    pub fn invalidate(&self) {
        self.inner.invalidated.send_if_modified(|flag| {
            let changed = !*flag;
            *flag = true;
            changed
        });
    }

    /// `true` once the session has been invalidated.
    pub fn is_invalidated(&self) -> bool {
        *self.inner.invalidated.borrow()
    }

    /// Register as an invalidation observer.
    ///
    /// The receiver yields `true` exactly once, when the session dies.
    pub fn subscribe_invalidated(&self) -> watch::Receiver<bool> {
        self.inner.invalidated.subscribe()
    }
}
