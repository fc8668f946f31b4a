//! Scoped session ownership.

use std::ops::{Deref, DerefMut};

use tracing::trace;

use crate::ports::Session;

/// Owns a session for the duration of one attempt and releases it on drop.
///
/// Release runs exactly once, whichever way the attempt ends: normal return,
/// early `?`, panic unwinding, or the run future being dropped.
pub struct SessionGuard<S: Session> {
    session: Option<S>,
}

impl<S: Session> SessionGuard<S> {
    /// Take ownership of a freshly started session.
    pub fn new(session: S) -> Self {
        Self { session: Some(session) }
    }

    /// Release the session now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(mut session) = self.session.take() {
            trace!(session_id = %session.id(), "Releasing session");
            session.end_session();
        }
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        // Only `release`/`drop` take the session, and both consume the guard
        self.session.as_ref().expect("session released")
    }
}

impl<S: Session> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session.as_mut().expect("session released")
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
