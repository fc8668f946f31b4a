//! Command dispatch.
//!
//! Builds the store backend named by the configuration, wraps it in an
//! executor and runs one command against it.

use std::sync::Arc;

use tracing::info;
use unitwork_exec::{CancellationToken, Executor, RunOptions, SessionProvider};
use unitwork_store::{DocumentSession, MemoryStore};

use crate::command::Command;
use crate::config::{Backend, Config};
use crate::error::{CliError, CliResult};
use crate::transfer::{demo_accounts, run_demo, Bank};

/// Per-run options: configured policy, deadline, and the shared cancel token.
pub fn run_options(config: &Config, cancel: CancellationToken) -> CliResult<RunOptions> {
    let mut options = RunOptions::new()
        .with_policy(config.retry_policy()?)
        .with_cancel_token(cancel);
    if let Some(deadline) = config.deadline {
        options = options.with_timeout(deadline);
    }
    Ok(options)
}

/// Run a bank command against any document store.
pub async fn execute<P>(bank: Arc<Bank<P>>, command: Command) -> CliResult<()>
where
    P: SessionProvider + 'static,
    P::Session: DocumentSession,
{
    match command {
        Command::Transfer { from, to, amount } => {
            bank.transfer(&from, &to, amount).await?;
        },
        Command::Balance { account } => {
            let balance = bank.balance(&account).await?;
            info!(%account, %balance, "Balance");
        },
        Command::Demo { transfers } => {
            run_demo(bank, transfers).await?;
        },
        Command::Db { .. } => {
            return Err(CliError::Usage("db commands need the postgres backend".to_string()));
        },
    }
    Ok(())
}

/// Run one command with the configured backend.
pub async fn run(config: Config, command: Command, cancel: CancellationToken) -> anyhow::Result<()> {
    let options = run_options(&config, cancel)?;

    if let Command::Db { args } = &command {
        return run_db(&config, args).await;
    }

    match config.store.backend {
        Backend::Memory => {
            let store = MemoryStore::new();
            let executor = Executor::new(Arc::new(store.clone())).with_policy(config.retry_policy()?);
            let bank = Arc::new(Bank::new(executor, options));

            // Fresh store on every invocation
            for (id, balance) in demo_accounts() {
                bank.open_account(id, balance).await?;
            }

            execute(bank, command).await?;
            info!(
                commits = store.commits(),
                conflicts = store.conflicts(),
                aborts = store.aborts(),
                "Memory store statistics"
            );
        },
        Backend::Postgres => run_postgres(&config, options, command).await?,
    }

    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_postgres(config: &Config, options: RunOptions, command: Command) -> anyhow::Result<()> {
    use unitwork_store::PgSessionProvider;

    let url = config
        .store
        .database_url
        .as_deref()
        .ok_or_else(|| CliError::Config("DATABASE_URL is required".to_string()))?;
    let pool = sqlx::PgPool::connect(url).await?;

    let executor = Executor::new(Arc::new(PgSessionProvider::new(Arc::new(pool))))
        .with_policy(config.retry_policy()?);
    execute(Arc::new(Bank::new(executor, options)), command).await?;
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(_config: &Config, _options: RunOptions, _command: Command) -> anyhow::Result<()> {
    Err(CliError::Config("built without the `postgres` feature".to_string()).into())
}

#[cfg(feature = "postgres")]
async fn run_db(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let url = config.store.database_url.as_deref().ok_or_else(|| {
        CliError::Config("DATABASE_URL environment variable is required for db commands".to_string())
    })?;
    crate::db::run_db_command(url, args).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_config: &Config, _args: &[String]) -> anyhow::Result<()> {
    Err(CliError::Config("db commands need the `postgres` feature".to_string()).into())
}
