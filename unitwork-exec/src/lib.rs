//! Unitwork Execution Layer
//!
//! Retryable transactional unit of work over any session-based store.
//!
//! # Architecture
//!
//! ```text
//! Caller → Executor::run(operation) → SessionProvider → Session → commit | abort
//!                  ↑                                        │
//!                  └──── retry (transient, with backoff) ───┘
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits the store implements (`SessionProvider`, `Session`)
//! - **Executor**: Acquires sessions, runs the operation, commits/aborts, retries
//! - **Policy**: Max attempts and backoff schedule
//! - **Classifier**: Pluggable transient-vs-fatal decision for store errors
//! - **Guard**: Scoped session release (runs on every exit path)
//! - **Stub**: Scripted provider for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use unitwork_exec::{Executor, OpError, RetryPolicy};
//! use unitwork_store::{DocumentSession, MemoryStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let executor = Executor::new(store).with_policy(RetryPolicy::new(5)?);
//!
//! let name = executor
//!     .run(|session| Box::pin(async move {
//!         let doc = session.find_one("users", "u1").await?;
//!         Ok(doc.map(|d| d.body["name"].clone()))
//!     }))
//!     .await?;
//! ```

#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod executor;
pub mod guard;
pub mod policy;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use classify::{DefaultClassifier, TransientClassifier};
pub use error::{
    BoxError, CancelReason, ExecError, ExecResult, OpError, StoreError, TRANSIENT_TRANSACTION_LABEL,
};
pub use executor::{Executor, RunOptions};
pub use futures_util::future::BoxFuture;
pub use guard::SessionGuard;
pub use policy::{Backoff, RetryPolicy};
pub use ports::{Session, SessionId, SessionProvider};
pub use stub::{OutcomeScript, StubProvider, StubSession};
pub use tokio_util::sync::CancellationToken;
