//! Database CLI subcommands.
//!
//! Provides `db migrate`, `db status`, and `db seed` commands.

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use tracing::info;

use unitwork_db::{migrate, seed_accounts, status};

use crate::transfer::demo_accounts;

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `unitwork db migrate` - Run pending migrations
/// - `unitwork db status` - Check migration status
/// - `unitwork db seed [--balance AMOUNT]` - Create the demo accounts
pub async fn run_db_command(database_url: &str, args: &[String]) -> Result<()> {
    let subcommand = args
        .first()
        .ok_or_else(|| anyhow!("Usage: unitwork db <migrate|status|seed> [options]"))?;

    let pool = sqlx::PgPool::connect(database_url).await?;

    match subcommand.as_str() {
        "migrate" => {
            migrate(&pool).await?;
        },
        "status" => {
            status(&pool).await?;
        },
        "seed" => {
            let mut balance = None;

            // Parse optional arguments
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--balance" => {
                        if i + 1 < args.len() {
                            balance = Some(args[i + 1].parse::<Decimal>()?);
                            i += 2;
                        } else {
                            return Err(anyhow!("--balance requires a value"));
                        }
                    },
                    _ => {
                        return Err(anyhow!("Unknown option: {}", args[i]));
                    },
                }
            }

            let accounts: Vec<(&str, Decimal)> = demo_accounts()
                .into_iter()
                .map(|(id, default)| (id, balance.unwrap_or(default)))
                .collect();

            let created = seed_accounts(&pool, &accounts).await?;
            info!(created, "Seed completed");
        },
        _ => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or seed", subcommand));
        },
    }

    Ok(())
}
