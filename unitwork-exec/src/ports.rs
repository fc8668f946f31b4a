//! Store port definitions.
//!
//! Ports define the interface the executor needs from a transactional store.
//! Adapters implement these ports for specific stores (in-memory, PostgreSQL, stub).

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

/// Unique identifier of a session (for logging/diagnostics).
pub type SessionId = Uuid;

// =============================================================================
// Session Provider Port
// =============================================================================

/// Port for acquiring sessions from a store connection.
///
/// Implementations:
/// - `StubProvider` - Scripted sessions for executor tests
/// - `MemoryStore` - In-memory optimistic-concurrency store (`unitwork-store`)
/// - `PgSessionProvider` - PostgreSQL connection pool (`unitwork-store`, feature `postgres`)
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Session type handed to operations.
    type Session: Session + 'static;

    /// Start a new session.
    ///
    /// Each call returns a fresh session; sessions are never reused.
    async fn start_session(&self) -> Result<Self::Session, StoreError>;
}

// =============================================================================
// Session Port
// =============================================================================

/// Port for one transactional session.
///
/// The executor drives the lifecycle:
///
/// ```text
/// start_transaction → (operation) → commit | abort → end_session
/// ```
///
/// Ending a session with an open transaction must discard that transaction.
#[async_trait]
pub trait Session: Send {
    /// Session identifier.
    fn id(&self) -> SessionId;

    /// Begin a transaction on this session.
    async fn start_transaction(&mut self) -> Result<(), StoreError>;

    /// Commit the open transaction.
    ///
    /// Errors are classified by the executor: transient ones retry the
    /// whole unit of work, others are returned as `CommitFailed`.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Abort the open transaction, discarding its writes.
    async fn abort(&mut self) -> Result<(), StoreError>;

    /// Release the session back to its store.
    ///
    /// Synchronous so it can run from `Drop`. Must be idempotent.
    fn end_session(&mut self);
}
