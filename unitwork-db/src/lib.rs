//! Database lifecycle management for unitwork.
//!
//! Provides migration running, status checking, and demo account seeding.

mod init;

pub use init::{account_body, seed_accounts, ACCOUNTS};

use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs the latest applied migrations and the number of stored documents.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    // Runtime query (sqlx::query! requires DB at compile time)
    let rows = sqlx::query(
        r#"
        SELECT version, description, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("Latest migrations:");
            for mig in migs {
                let version: i64 = mig.try_get("version")?;
                let description: String = mig.try_get("description")?;
                let success: bool = mig.try_get("success")?;

                let status = if success { "✓" } else { "✗" };
                info!("  {} v{}: {}", status, version, description);
            }
        },
        Ok(_) => {
            warn!("No migrations found in database (run `unitwork db migrate` first)");
            return Ok(());
        },
        Err(e) => {
            // Table might not exist yet
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `unitwork db migrate` first)");
                return Ok(());
            }
            return Err(e.into());
        },
    }

    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    info!(documents, "Document table: OK");

    Ok(())
}
