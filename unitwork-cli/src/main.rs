//! Unitwork CLI
//!
//! Runs bank transfers as retryable units of work.
//!
//! # Usage
//!
//! ```bash
//! # Concurrent transfers against the in-memory store
//! cargo run -p unitwork-cli -- demo --transfers 100
//!
//! # Against PostgreSQL
//! UNITWORK_BACKEND=postgres DATABASE_URL=postgres://... \
//!     cargo run -p unitwork-cli --features postgres -- transfer alice bob 25
//! ```
//!
//! # Environment Variables
//!
//! - `UNITWORK_ENV`: Environment (test, development, production)
//! - `UNITWORK_BACKEND`: Store backend (memory, postgres)
//! - `DATABASE_URL`: PostgreSQL connection string
//! - `UNITWORK_MAX_ATTEMPTS`: Attempts per unit of work (default: 5)
//! - `UNITWORK_BACKOFF_BASE_MS`: First retry delay (default: 10, 0 = none)
//! - `UNITWORK_BACKOFF_MAX_MS`: Retry delay ceiling (default: 1000)
//! - `UNITWORK_BACKOFF_JITTER`: Randomize retry delays (default: true)
//! - `UNITWORK_DEADLINE_MS`: Per-run deadline (default: none)
//! - `UNITWORK_LOG_JSON`: JSON log output (default: false)

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unitwork_cli::{app, Command, Config};
use unitwork_exec::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(config.log_json.then(|| fmt::layer().json()))
        .with((!config.log_json).then(fmt::layer))
        .with(EnvFilter::from_default_env().add_directive("unitwork=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        backend = %config.store.backend,
        max_attempts = config.retry.max_attempts,
        "Unitwork"
    );

    // Ctrl-C cancels every in-flight unit of work
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received shutdown signal, cancelling");
                cancel.cancel();
            }
        }
    });

    app::run(config, command, cancel).await
}
