//! Unitwork CLI Library
//!
//! Runs bank-transfer units of work against an in-memory or PostgreSQL
//! document store.
//!
//! # Architecture
//!
//! ```text
//! CLI → Command → Bank → Executor → SessionProvider (MemoryStore | PgSessionProvider)
//!                           ↑
//!                 CancellationToken (Ctrl-C), deadline
//! ```
//!
//! # Components
//!
//! - **Config**: Environment-based configuration
//! - **Command**: Argument parsing
//! - **Bank**: Transfers, balances and account creation as units of work
//! - **App**: Backend selection and command dispatch
//! - **Db**: Migrations and seeding (feature `postgres`)
//!
//! # Example
//!
//! ```rust,ignore
//! use unitwork_cli::{app, Command, Config};
//! use unitwork_exec::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let command = Command::Demo { transfers: 50 };
//!     app::run(config, command, CancellationToken::new()).await
//! }
//! ```

#![warn(clippy::all)]

pub mod app;
pub mod command;
pub mod config;
pub mod error;
pub mod transfer;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use command::{Command, USAGE};
pub use config::{Backend, Config, Environment, RetryConfig, StoreConfig};
pub use error::{CliError, CliResult};
pub use transfer::{apply_transfer, run_demo, Bank, DemoReport, Receipt, TransferError};
