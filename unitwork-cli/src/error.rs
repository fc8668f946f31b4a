//! CLI error types.

use crate::transfer::TransferError;
use thiserror::Error;
use unitwork_exec::ExecError;

/// CLI-level errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Unit of work failed
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Transfer rejected before running
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Demo finished with a different total than it started with
    #[error("Balance total changed: before {before}, after {after}")]
    TotalMismatch {
        /// Sum of balances before the demo
        before: String,
        /// Sum of balances after the demo
        after: String,
    },

    /// Spawned transfer task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    /// Bad command line
    #[error("Usage: {0}")]
    Usage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
