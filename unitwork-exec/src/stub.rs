//! Stub implementations for testing.
//!
//! These implementations simulate a transactional store without any real
//! storage, and count every lifecycle call so tests can check that sessions
//! are released exactly once and attempts never overlap.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{OpError, StoreError};
use crate::ports::{Session, SessionId, SessionProvider};

// =============================================================================
// Stub Provider
// =============================================================================

#[derive(Default)]
struct StubState {
    sessions_started: AtomicU32,
    sessions_ended: AtomicU32,
    double_releases: AtomicU32,
    live_sessions: AtomicU32,
    max_live_sessions: AtomicU32,
    transactions_started: AtomicU32,
    commits: AtomicU32,
    aborts: AtomicU32,
    /// Errors returned by upcoming `start_session` calls
    session_failures: Mutex<VecDeque<StoreError>>,
    /// Errors returned by upcoming `start_transaction` calls
    transaction_failures: Mutex<VecDeque<StoreError>>,
    /// Results of upcoming `commit` calls (Ok once drained)
    commit_results: Mutex<VecDeque<Result<(), StoreError>>>,
    /// Errors returned by upcoming `abort` calls
    abort_failures: Mutex<VecDeque<StoreError>>,
    /// Delay before `start_session` returns
    start_delay: Mutex<Option<Duration>>,
    /// Delay before `start_transaction` returns
    transaction_delay: Mutex<Option<Duration>>,
}

/// Stub session provider for testing.
///
/// Commits succeed unless failures were queued.
#[derive(Clone, Default)]
pub struct StubProvider {
    state: Arc<StubState>,
}

impl StubProvider {
    /// Create a new stub provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next `start_session` call.
    pub fn fail_next_session(&self, err: StoreError) {
        self.state.session_failures.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `start_transaction` call.
    pub fn fail_next_transaction(&self, err: StoreError) {
        self.state.transaction_failures.lock().unwrap().push_back(err);
    }

    /// Queue the results of upcoming commits.
    pub fn script_commits(&self, results: impl IntoIterator<Item = Result<(), StoreError>>) {
        self.state.commit_results.lock().unwrap().extend(results);
    }

    /// Queue an error for the next `abort` call.
    pub fn fail_next_abort(&self, err: StoreError) {
        self.state.abort_failures.lock().unwrap().push_back(err);
    }

    /// Delay every `start_session` call.
    pub fn set_start_delay(&self, delay: Duration) {
        *self.state.start_delay.lock().unwrap() = Some(delay);
    }

    /// Delay every `start_transaction` call.
    pub fn set_transaction_delay(&self, delay: Duration) {
        *self.state.transaction_delay.lock().unwrap() = Some(delay);
    }

    /// Sessions handed out so far.
    pub fn sessions_started(&self) -> u32 {
        self.state.sessions_started.load(Ordering::SeqCst)
    }

    /// Sessions released (first release only).
    pub fn sessions_ended(&self) -> u32 {
        self.state.sessions_ended.load(Ordering::SeqCst)
    }

    /// `end_session` calls on an already released session.
    pub fn double_releases(&self) -> u32 {
        self.state.double_releases.load(Ordering::SeqCst)
    }

    /// Highest number of sessions alive at the same time.
    pub fn max_live_sessions(&self) -> u32 {
        self.state.max_live_sessions.load(Ordering::SeqCst)
    }

    /// Transactions started.
    pub fn transactions_started(&self) -> u32 {
        self.state.transactions_started.load(Ordering::SeqCst)
    }

    /// Commit calls (successful or not).
    pub fn commits(&self) -> u32 {
        self.state.commits.load(Ordering::SeqCst)
    }

    /// Abort calls.
    pub fn aborts(&self) -> u32 {
        self.state.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StubProvider {
    type Session = StubSession;

    async fn start_session(&self) -> Result<StubSession, StoreError> {
        let delay = *self.state.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.state.session_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.state.sessions_started.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live_sessions.fetch_max(live, Ordering::SeqCst);

        Ok(StubSession {
            id: Uuid::now_v7(),
            state: Arc::clone(&self.state),
            ended: false,
        })
    }
}

// =============================================================================
// Stub Session
// =============================================================================

/// Session handed out by [`StubProvider`].
pub struct StubSession {
    id: SessionId,
    state: Arc<StubState>,
    ended: bool,
}

#[async_trait]
impl Session for StubSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn start_transaction(&mut self) -> Result<(), StoreError> {
        let delay = *self.state.transaction_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.state.transaction_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.state.transactions_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        self.state.commit_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        self.state.abort_failures.lock().unwrap().pop_front().map_or(Ok(()), Err)
    }

    fn end_session(&mut self) {
        if self.ended {
            self.state.double_releases.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.ended = true;
        self.state.sessions_ended.fetch_add(1, Ordering::SeqCst);
        self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Outcome Script
// =============================================================================

/// Scripted operation outcomes, one per invocation.
///
/// Once the script is drained every further call fails with a fatal error.
pub struct OutcomeScript<T> {
    outcomes: Mutex<VecDeque<Result<T, OpError>>>,
    calls: AtomicU32,
}

impl<T> OutcomeScript<T> {
    /// Create a script from a list of outcomes.
    pub fn new(outcomes: impl IntoIterator<Item = Result<T, OpError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    /// Outcome of the next invocation.
    pub fn next(&self) -> Result<T, OpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OpError::fatal("outcome script exhausted")))
    }

    /// Number of invocations so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_provider_counts_lifecycle() {
        let provider = StubProvider::new();

        let mut session = provider.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session.commit().await.unwrap();
        session.end_session();
        session.end_session();

        assert_eq!(provider.sessions_started(), 1);
        assert_eq!(provider.transactions_started(), 1);
        assert_eq!(provider.commits(), 1);
        assert_eq!(provider.sessions_ended(), 1);
        assert_eq!(provider.double_releases(), 1);
    }

    #[tokio::test]
    async fn test_stub_provider_scripted_failures() {
        let provider = StubProvider::new();
        provider.fail_next_session(StoreError::Connection("refused".to_string()));
        provider.script_commits([Err(StoreError::WriteConflict("k".to_string()))]);

        assert!(provider.start_session().await.is_err());

        let mut session = provider.start_session().await.unwrap();
        assert!(matches!(session.commit().await, Err(StoreError::WriteConflict(_))));
        assert!(session.commit().await.is_ok());
        session.end_session();
    }

    #[tokio::test]
    async fn test_stub_abort_failure_is_counted() {
        let provider = StubProvider::new();
        provider.fail_next_abort(StoreError::Connection("reset".to_string()));

        let mut session = provider.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        assert!(matches!(session.abort().await, Err(StoreError::Connection(_))));
        assert!(session.abort().await.is_ok());
        session.end_session();

        assert_eq!(provider.aborts(), 2);
    }

    #[test]
    fn test_outcome_script_drains() {
        let script = OutcomeScript::new([Ok(1), Err(OpError::transient("busy"))]);

        assert!(matches!(script.next(), Ok(1)));
        assert!(matches!(script.next(), Err(OpError::Transient(_))));
        assert!(matches!(script.next(), Err(OpError::Fatal(_))));
        assert_eq!(script.calls(), 3);
    }
}
