//! Executor: runs a caller operation as a retryable unit of work.
//!
//! The Executor owns the transaction lifecycle around a caller-supplied
//! operation. The operation only performs reads and writes; acquiring the
//! session, committing, aborting, retrying and releasing all happen here.
//!
//! # Flow (one attempt)
//!
//! ```text
//! Idle → SessionAcquired → OperationRunning → CommitPending → Committed
//!                               │                   │
//!                               │                   └→ ConflictDetected (transient commit error)
//!                               ├→ Aborted          (fatal operation error)
//!                               └→ ConflictDetected (transient operation error)
//!
//! ConflictDetected → backoff → Idle (attempts remain) | Failed (exhausted)
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::{DefaultClassifier, TransientClassifier};
use crate::error::{CancelReason, ExecError, ExecResult, OpError};
use crate::guard::SessionGuard;
use crate::policy::RetryPolicy;
use crate::ports::{Session, SessionProvider};

// =============================================================================
// Run Options
// =============================================================================

/// Per-run settings.
///
/// Anything left unset falls back to the executor's defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    policy: Option<RetryPolicy>,
    cancel_token: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl RunOptions {
    /// Options with executor defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the retry policy for this run.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Stop the run when `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Stop the run once `timeout` has elapsed since it started.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Cancellation sources observed by one run.
struct CancelSignal<'a> {
    token: Option<&'a CancellationToken>,
    deadline: Option<Instant>,
}

impl CancelSignal<'_> {
    /// Non-blocking check.
    fn check(&self) -> Option<CancelReason> {
        if self.token.is_some_and(CancellationToken::is_cancelled) {
            return Some(CancelReason::Signal);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(CancelReason::DeadlineElapsed);
        }
        None
    }

    /// Resolves when either source fires; never resolves if neither is set.
    async fn fired(&self) -> CancelReason {
        let token = async {
            match self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = token => CancelReason::Signal,
            () = deadline => CancelReason::DeadlineElapsed,
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Outcome of an attempt that did not end the run with an error.
enum Attempt<T> {
    /// Transaction committed with the operation's result
    Committed(T),
    /// Transient failure; the run may try again
    Conflict(OpError),
}

/// Runs operations as transactional units of work.
///
/// The Executor:
/// 1. Acquires a fresh session and starts a transaction
/// 2. Invokes the operation with the session
/// 3. Commits on success, aborts on failure
/// 4. Retries transient failures according to the retry policy
/// 5. Releases the session on every path
///
/// Attempts of one run are strictly sequential. Independent runs may share
/// one executor concurrently; conflicts between them are the store's job.
pub struct Executor<P: SessionProvider, C: TransientClassifier = DefaultClassifier> {
    /// Session source
    provider: Arc<P>,
    /// Decides which store errors are retried
    classifier: C,
    /// Policy for runs that do not override it
    policy: RetryPolicy,
}

impl<P: SessionProvider> Executor<P> {
    /// Create an executor with the default classifier and policy.
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            classifier: DefaultClassifier,
            policy: RetryPolicy::default(),
        }
    }
}

impl<P: SessionProvider, C: TransientClassifier> Executor<P, C> {
    /// Replace the transient classifier.
    pub fn with_classifier<C2: TransientClassifier>(self, classifier: C2) -> Executor<P, C2> {
        Executor {
            provider: self.provider,
            classifier,
            policy: self.policy,
        }
    }

    /// Replace the default retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Session provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run `operation` as a unit of work with the executor defaults.
    ///
    /// The operation may be invoked once per attempt, so it must be safe
    /// to re-run.
    ///
    /// ```rust,ignore
    /// let balance = executor
    ///     .run(|session| Box::pin(async move {
    ///         let doc = session.find_one("accounts", "alice").await?;
    ///         Ok(doc)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, operation: F) -> ExecResult<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut P::Session) -> BoxFuture<'s, Result<T, OpError>> + Send,
    {
        self.run_with(RunOptions::default(), operation).await
    }

    /// Run `operation` as a unit of work with per-run options.
    pub async fn run_with<T, F>(&self, options: RunOptions, mut operation: F) -> ExecResult<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut P::Session) -> BoxFuture<'s, Result<T, OpError>> + Send,
    {
        let policy = options.policy.as_ref().unwrap_or(&self.policy);
        let signal = CancelSignal {
            token: options.cancel_token.as_ref(),
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
        };
        let max_attempts = policy.max_attempts();
        let run_id = Uuid::now_v7();

        let mut attempt = 0;
        loop {
            attempt += 1;

            if let Some(reason) = signal.check() {
                info!(%run_id, attempt, %reason, "Run cancelled before attempt");
                return Err(ExecError::Cancelled(reason));
            }

            debug!(%run_id, attempt, max_attempts, "Starting attempt");

            let last = match self.run_attempt(run_id, attempt, &signal, &mut operation).await? {
                Attempt::Committed(value) => {
                    if attempt > 1 {
                        info!(%run_id, attempts = attempt, "Unit of work committed after retry");
                    } else {
                        debug!(%run_id, "Unit of work committed");
                    }
                    return Ok(value);
                },
                Attempt::Conflict(err) => err,
            };

            if attempt >= max_attempts {
                error!(%run_id, attempts = attempt, error = %last, "Retries exhausted");
                return Err(ExecError::RetriesExhausted { attempts: attempt, last });
            }

            let delay = policy.delay_after(attempt);
            warn!(
                %run_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last,
                "Transient failure, retrying"
            );

            tokio::select! {
                biased;
                reason = signal.fired() => {
                    info!(%run_id, attempt, %reason, "Run cancelled during backoff");
                    return Err(ExecError::Cancelled(reason));
                },
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    /// Run a single attempt on a fresh session.
    ///
    /// `Err` ends the run; `Ok(Attempt::Conflict)` lets the caller retry.
    async fn run_attempt<T, F>(
        &self,
        run_id: Uuid,
        attempt: u32,
        signal: &CancelSignal<'_>,
        operation: &mut F,
    ) -> ExecResult<Attempt<T>>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut P::Session) -> BoxFuture<'s, Result<T, OpError>> + Send,
    {
        // 1. Acquire session and start transaction
        let acquired = tokio::select! {
            biased;
            reason = signal.fired() => {
                info!(%run_id, attempt, %reason, "Run cancelled while acquiring session");
                return Err(ExecError::Cancelled(reason));
            },
            result = self.provider.start_session() => result,
        };

        let mut session = match acquired {
            Ok(session) => SessionGuard::new(session),
            Err(err) => {
                error!(%run_id, attempt, error = %err, "Failed to start session");
                return Err(ExecError::SessionAcquireFailed(err));
            },
        };
        let session_id = session.id();

        let started = tokio::select! {
            biased;
            reason = signal.fired() => Err(reason),
            result = session.start_transaction() => Ok(result),
        };

        match started {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                error!(%run_id, attempt, %session_id, error = %err, "Failed to start transaction");
                session.release();
                return Err(ExecError::SessionAcquireFailed(err));
            },
            Err(reason) => {
                info!(%run_id, attempt, %session_id, %reason, "Run cancelled while starting transaction");
                session.release();
                return Err(ExecError::Cancelled(reason));
            },
        }

        // 2. Run the operation, racing cancellation
        let outcome = {
            let running = operation(&mut *session);
            tokio::select! {
                biased;
                reason = signal.fired() => Err(reason),
                result = running => Ok(result),
            }
        };

        let result = match outcome {
            Ok(result) => result,
            Err(reason) => {
                info!(%run_id, attempt, %session_id, %reason, "Run cancelled during operation");
                abort(&mut *session, run_id, attempt).await;
                session.release();
                return Err(ExecError::Cancelled(reason));
            },
        };

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                abort(&mut *session, run_id, attempt).await;
                session.release();

                if self.is_transient(&err) {
                    debug!(%run_id, attempt, %session_id, error = %err, "Operation hit transient failure");
                    return Ok(Attempt::Conflict(err));
                }

                error!(%run_id, attempt, %session_id, error = %err, "Operation failed");
                return Err(ExecError::Operation(err));
            },
        };

        // 3. Commit; once issued it is not interrupted
        if let Some(reason) = signal.check() {
            info!(%run_id, attempt, %session_id, %reason, "Run cancelled before commit");
            abort(&mut *session, run_id, attempt).await;
            session.release();
            return Err(ExecError::Cancelled(reason));
        }

        let committed = session.commit().await;
        session.release();

        match committed {
            Ok(()) => Ok(Attempt::Committed(value)),
            Err(err) if self.classifier.is_transient(&err) => {
                debug!(%run_id, attempt, %session_id, error = %err, "Commit hit transient failure");
                Ok(Attempt::Conflict(OpError::Store(err)))
            },
            Err(err) => {
                error!(%run_id, attempt, %session_id, error = %err, "Commit failed");
                Err(ExecError::CommitFailed(err))
            },
        }
    }

    fn is_transient(&self, err: &OpError) -> bool {
        match err {
            OpError::Transient(_) => true,
            OpError::Fatal(_) => false,
            OpError::Store(store_err) => self.classifier.is_transient(store_err),
        }
    }
}

/// Abort the open transaction; failures are logged, not returned, so the
/// attempt's own error stays the one reported.
async fn abort<S: Session>(session: &mut S, run_id: Uuid, attempt: u32) {
    if let Err(err) = session.abort().await {
        warn!(%run_id, attempt, session_id = %session.id(), error = %err, "Abort failed");
    }
}

// =============================================================================
// Tests
// =============================================================================
