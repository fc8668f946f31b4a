//! PostgreSQL session provider.
//!
//! Each session holds one pooled connection. Transactions run at
//! `SERIALIZABLE` isolation so concurrent units of work touching the same
//! documents fail with SQLSTATE 40001, which maps to `WriteConflict` and is
//! retried by the executor.
//!
//! A failed statement leaves the server-side transaction aborted, and a later
//! `COMMIT` would silently roll back. The session remembers the first such
//! error and `commit` reports it instead of pretending to succeed.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::document::{ensure_object, Document};
use crate::repository::DocumentSession;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row};
use std::sync::Arc;
use tracing::{debug, warn};
use unitwork_exec::{Session, SessionId, SessionProvider, StoreError};
use uuid::Uuid;

/// SQLSTATE codes treated as write conflicts
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE for unique key violations
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for statements issued in an aborted transaction
const IN_FAILED_TRANSACTION: &str = "25P02";

/// Map a driver error onto the store error taxonomy.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned());
            match code.as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    StoreError::WriteConflict(db.message().to_string())
                },
                _ => StoreError::Database { code, message: db.message().to_string() },
            }
        },
        sqlx::Error::PoolTimedOut => StoreError::Timeout("timed out acquiring connection".to_string()),
        sqlx::Error::PoolClosed => StoreError::Connection("connection pool closed".to_string()),
        sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
        sqlx::Error::Tls(e) => StoreError::Connection(e.to_string()),
        sqlx::Error::Decode(e) => StoreError::Serialization(e.to_string()),
        e @ sqlx::Error::ColumnDecode { .. } => StoreError::Serialization(e.to_string()),
        e => StoreError::Database { code: None, message: e.to_string() },
    }
}

/// PostgreSQL adapter implementing `SessionProvider`.
#[derive(Clone)]
pub struct PgSessionProvider {
    /// PostgreSQL connection pool
    pool: Arc<PgPool>,
}

impl PgSessionProvider {
    /// Create a new provider over a connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionProvider for PgSessionProvider {
    type Session = PgSession;

    async fn start_session(&self) -> Result<PgSession, StoreError> {
        let conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(PgSession { id: Uuid::now_v7(), conn: Some(conn), in_transaction: false, failed: None })
    }
}

/// Session holding one pooled PostgreSQL connection.
pub struct PgSession {
    id: SessionId,
    conn: Option<PoolConnection<Postgres>>,
    in_transaction: bool,
    /// First server error inside the open transaction
    failed: Option<StoreError>,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::InvalidState("session ended".to_string()))
    }

    /// Connection for a statement inside the open transaction.
    fn txn_conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        if !self.in_transaction {
            return Err(StoreError::InvalidState("no transaction in progress".to_string()));
        }
        self.conn()
    }

    /// Map a statement result, remembering server errors that abort the
    /// open transaction.
    fn track<T>(&mut self, result: Result<T, sqlx::Error>) -> Result<T, StoreError> {
        result.map_err(|err| {
            let server_side = matches!(err, sqlx::Error::Database(_));
            let mapped = map_sqlx_error(err);
            if server_side && self.in_transaction && self.failed.is_none() {
                debug!(session_id = %self.id, error = %mapped, "Transaction aborted by failed statement");
                self.failed = Some(mapped.clone());
            }
            mapped
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        sqlx::query(sql).execute(conn).await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn parse_document(row: &PgRow) -> Result<Document, StoreError> {
    let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
    Ok(Document {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        body: row.try_get("body").map_err(map_sqlx_error)?,
        version: version as u64,
    })
}

#[async_trait]
impl Session for PgSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn start_transaction(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::InvalidState("transaction already in progress".to_string()));
        }
        self.execute("BEGIN ISOLATION LEVEL SERIALIZABLE").await?;
        self.in_transaction = true;
        self.failed = None;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::InvalidState("no transaction in progress".to_string()));
        }
        if let Some(cause) = self.failed.take() {
            warn!(session_id = %self.id, error = %cause, "Rolling back aborted transaction instead of committing");
            let rolled_back = self.execute("ROLLBACK").await;
            self.in_transaction = false;
            rolled_back?;
            return Err(match cause {
                StoreError::WriteConflict(_) => cause,
                other => StoreError::Database {
                    code: Some(IN_FAILED_TRANSACTION.to_string()),
                    message: format!("transaction aborted by earlier error: {}", other),
                },
            });
        }

        // PostgreSQL ends the transaction whether COMMIT succeeds or not
        let result = self.execute("COMMIT").await;
        self.in_transaction = false;
        result
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::InvalidState("no transaction in progress".to_string()));
        }
        let result = self.execute("ROLLBACK").await;
        self.in_transaction = false;
        self.failed = None;
        result
    }

    fn end_session(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        self.failed = None;
        if self.in_transaction {
            // Closing the connection discards the server-side transaction
            warn!(session_id = %self.id, "Session ended with open transaction, closing connection");
            self.in_transaction = false;
            conn.close_on_drop();
            drop(conn);
        } else {
            debug!(session_id = %self.id, "Returning connection to pool");
            drop(conn);
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.end_session();
    }
}

// =============================================================================
// Document Repository Implementation
// =============================================================================

#[async_trait]
impl DocumentSession for PgSession {
    async fn insert_one(&mut self, collection: &str, id: &str, body: Value) -> Result<(), StoreError> {
        ensure_object(&body)?;
        let conn = self.txn_conn()?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, version)
            VALUES ($1, $2, $3, 1)
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .execute(conn)
        .await;

        match self.track(result) {
            Ok(_) => Ok(()),
            Err(StoreError::Database { code: Some(code), .. }) if code == UNIQUE_VIOLATION => {
                Err(StoreError::duplicate(collection, id))
            },
            Err(e) => Err(e),
        }
    }

    async fn find_one(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.txn_conn()?;

        let row = sqlx::query(
            r#"
            SELECT id, body, version
            FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(conn)
        .await;
        let row = self.track(row)?;

        row.as_ref().map(parse_document).transpose()
    }

    async fn find(&mut self, collection: &str, filter: &Value) -> Result<Vec<Document>, StoreError> {
        let filter = match filter {
            Value::Null => json!({}),
            Value::Object(_) => filter.clone(),
            _ => return Ok(Vec::new()),
        };
        let conn = self.txn_conn()?;

        let rows = sqlx::query(
            r#"
            SELECT id, body, version
            FROM documents
            WHERE collection = $1 AND body @> $2
            ORDER BY id ASC
            "#,
        )
        .bind(collection)
        .bind(&filter)
        .fetch_all(conn)
        .await;
        let rows = self.track(rows)?;

        rows.iter().map(parse_document).collect()
    }

    async fn update_one(
        &mut self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Document, StoreError> {
        ensure_object(&patch)?;
        let conn = self.txn_conn()?;

        let row = sqlx::query(
            r#"
            UPDATE documents
            SET body = body || $3, version = version + 1
            WHERE collection = $1 AND id = $2
            RETURNING id, body, version - 1 AS version
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&patch)
        .fetch_optional(conn)
        .await;

        match self.track(row)? {
            Some(row) => parse_document(&row),
            None => Err(StoreError::not_found(collection, id)),
        }
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<Document, StoreError> {
        ensure_object(&body)?;
        let conn = self.txn_conn()?;

        let row = sqlx::query(
            r#"
            UPDATE documents
            SET body = $3, version = version + 1
            WHERE collection = $1 AND id = $2
            RETURNING id, body, version - 1 AS version
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .fetch_optional(conn)
        .await;

        match self.track(row)? {
            Some(row) => parse_document(&row),
            None => Err(StoreError::not_found(collection, id)),
        }
    }

    async fn delete_one(&mut self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let conn = self.txn_conn()?;

        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(conn)
            .await;
        let result = self.track(result)?;

        Ok(result.rows_affected() > 0)
    }
}
