//! Demo data initialization.
//!
//! Seeds the account documents the transfer commands operate on.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::info;

use super::Result;

/// Collection holding account documents.
pub const ACCOUNTS: &str = "accounts";

/// Body of an account document. Balances are stored as decimal strings.
pub fn account_body(balance: Decimal) -> Value {
    json!({ "balance": balance.to_string() })
}

/// Create account documents if they don't exist.
///
/// Runs in one transaction. Uses INSERT ... ON CONFLICT DO NOTHING for
/// idempotency; returns the number of accounts actually created.
pub async fn seed_accounts(pool: &PgPool, accounts: &[(&str, Decimal)]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut created = 0;

    for (id, balance) in accounts {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, version)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(ACCOUNTS)
        .bind(*id)
        .bind(account_body(*balance))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            info!(account = %id, %balance, "Seeded account");
            created += 1;
        } else {
            info!(account = %id, "Account already exists");
        }
    }

    tx.commit().await?;
    Ok(created)
}
