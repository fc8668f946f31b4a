//! Unit-of-work error types.
//!
//! Three layers:
//! - [`StoreError`]: raised by the store behind the session ports
//! - [`OpError`]: raised by caller operations (caller-classified, or a store error)
//! - [`ExecError`]: returned by the executor to the caller

use std::fmt;

use thiserror::Error;

/// Boxed error cause carried by operation failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Label a store attaches to errors that are safe to retry as a whole transaction.
pub const TRANSIENT_TRANSACTION_LABEL: &str = "TransientTransactionError";

// =============================================================================
// Store Error
// =============================================================================

/// Errors raised by a transactional store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Document not found
    #[error("Document not found: {collection} with id {id}")]
    NotFound {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Duplicate document (unique key violation)
    #[error("Duplicate document: {collection} with id {id}")]
    Duplicate {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Concurrent transaction touched the same data
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// Operation not valid in the current session/transaction state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database error with optional vendor code
    #[error("Database error{}: {message}", code_suffix(.code))]
    Database {
        /// Vendor error code (e.g. SQLSTATE)
        code: Option<String>,
        /// Error message
        message: String,
    },

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timed out waiting on the store
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Driver error carrying error labels
    #[error("{message} (labels: {})", .labels.join(", "))]
    Labeled {
        /// Error labels (e.g. `TransientTransactionError`)
        labels: Vec<String>,
        /// Error message
        message: String,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a duplicate error
    pub fn duplicate(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a labelled driver error
    pub fn labeled<I, L>(labels: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self::Labeled {
            labels: labels.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }

    /// Whether the error carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        match self {
            Self::Labeled { labels, .. } => labels.iter().any(|l| l == label),
            _ => false,
        }
    }
}

// =============================================================================
// Operation Error
// =============================================================================

/// Errors returned by a caller-supplied operation.
#[derive(Debug, Error)]
pub enum OpError {
    /// Non-retryable failure; propagated immediately.
    #[error("Fatal: {0}")]
    Fatal(#[source] BoxError),

    /// Retryable failure; the whole unit of work is run again.
    #[error("Transient: {0}")]
    Transient(#[source] BoxError),

    /// Store failure; transience decided by the executor's classifier.
    #[error("Store: {0}")]
    Store(#[from] StoreError),
}

impl OpError {
    /// Create a fatal operation error
    pub fn fatal(cause: impl Into<BoxError>) -> Self {
        Self::Fatal(cause.into())
    }

    /// Create a transient operation error
    pub fn transient(cause: impl Into<BoxError>) -> Self {
        Self::Transient(cause.into())
    }
}

// =============================================================================
// Executor Error
// =============================================================================

/// Why a run stopped before reaching a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cancellation token fired
    Signal,
    /// The run deadline elapsed
    DeadlineElapsed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Signal => write!(f, "cancellation requested"),
            CancelReason::DeadlineElapsed => write!(f, "deadline elapsed"),
        }
    }
}

/// Errors returned by [`Executor`](crate::Executor) runs.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Could not acquire a session or start its transaction (never retried)
    #[error("Session acquisition failed: {0}")]
    SessionAcquireFailed(#[source] StoreError),

    /// Commit failed with a non-transient error (never retried)
    #[error("Commit failed: {0}")]
    CommitFailed(#[source] StoreError),

    /// Operation failed with a non-transient error
    #[error("Operation failed: {0}")]
    Operation(#[source] OpError),

    /// Every attempt ended in a transient failure
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Last transient failure
        #[source]
        last: OpError,
    },

    /// Run cancelled before completion
    #[error("Run cancelled: {0}")]
    Cancelled(CancelReason),

    /// Retry policy rejected
    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
}

impl ExecError {
    /// Whether this error means the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result type for executor operations.
pub type ExecResult<T> = Result<T, ExecError>;
