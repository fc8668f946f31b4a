//! Unitwork Storage Layer
//!
//! Transactional document stores that plug into the executor.
//!
//! # Architecture
//!
//! - **Document port**: `DocumentSession` CRUD on top of the executor's `Session`
//! - **In-memory store**: Optimistic-concurrency implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use unitwork_exec::Executor;
//! use unitwork_store::{DocumentSession, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let executor = Executor::new(Arc::new(store.clone()));
//!
//!     executor
//!         .run(|session| {
//!             Box::pin(async move {
//!                 session.insert_one("users", "u1", json!({"name": "Ada"})).await?;
//!                 Ok(())
//!             })
//!         })
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(store.document_count("users"), 1);
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod document;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use document::Document;
pub use memory::{MemorySession, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{map_sqlx_error, PgSession, PgSessionProvider};
pub use repository::DocumentSession;
pub use unitwork_exec::StoreError;
