//! Bank transfers as units of work.
//!
//! Account documents live in the `accounts` collection with the balance
//! stored as a decimal string. A transfer reads both accounts, debits one,
//! credits the other and appends a ledger entry, all in one transaction.
//! Concurrent transfers on the same accounts conflict and are retried by
//! the executor.

use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use unitwork_db::{account_body, ACCOUNTS};
use unitwork_exec::{ExecError, Executor, OpError, RunOptions, SessionProvider};
use unitwork_store::{Document, DocumentSession, StoreError};

use crate::error::{CliError, CliResult};

/// Collection holding one entry per committed transfer.
pub const LEDGER: &str = "ledger";

/// Accounts created by `demo` and the in-memory backend.
pub fn demo_accounts() -> [(&'static str, Decimal); 2] {
    [("alice", Decimal::new(1000, 0)), ("bob", Decimal::new(1000, 0))]
}

// =============================================================================
// Errors
// =============================================================================

/// Business-rule failures. Raised inside the unit of work as fatal errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Source and destination are the same account
    #[error("Cannot transfer from {0} to itself")]
    SameAccount(String),

    /// Source balance too low
    #[error("Insufficient funds in {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Source account
        account: String,
        /// Balance at the time of the transfer
        balance: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// Stored balance is not a decimal string
    #[error("Corrupt balance in {account}: {value}")]
    InvalidBalance {
        /// Account ID
        account: String,
        /// Stored value
        value: String,
    },
}

/// Outcome of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Ledger entry ID
    pub ledger_id: String,
    /// Source balance after the transfer
    pub from_balance: Decimal,
    /// Destination balance after the transfer
    pub to_balance: Decimal,
}

fn read_balance(doc: &Document) -> Result<Decimal, TransferError> {
    let invalid = || TransferError::InvalidBalance {
        account: doc.id.clone(),
        value: doc.body["balance"].to_string(),
    };
    doc.get("balance")
        .and_then(|v| v.as_str())
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())
}

async fn load_account<S: DocumentSession>(session: &mut S, id: &str) -> Result<Decimal, OpError> {
    let doc = session
        .find_one(ACCOUNTS, id)
        .await?
        .ok_or_else(|| StoreError::not_found(ACCOUNTS, id))?;
    read_balance(&doc).map_err(OpError::fatal)
}

/// Transfer body: runs inside one transaction attempt.
pub async fn apply_transfer<S: DocumentSession>(
    session: &mut S,
    from: &str,
    to: &str,
    amount: Decimal,
) -> Result<Receipt, OpError> {
    let from_balance = load_account(session, from).await?;
    let to_balance = load_account(session, to).await?;

    if from_balance < amount {
        return Err(OpError::fatal(TransferError::InsufficientFunds {
            account: from.to_string(),
            balance: from_balance,
            requested: amount,
        }));
    }

    let from_balance = from_balance - amount;
    let to_balance = to_balance + amount;

    session.update_one(ACCOUNTS, from, account_body(from_balance)).await?;
    session.update_one(ACCOUNTS, to, account_body(to_balance)).await?;

    let ledger_id = Uuid::now_v7().to_string();
    session
        .insert_one(
            LEDGER,
            &ledger_id,
            json!({
                "from": from,
                "to": to,
                "amount": amount.to_string(),
                "at": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .await?;

    Ok(Receipt {
        ledger_id,
        from_balance,
        to_balance,
    })
}

// =============================================================================
// Bank
// =============================================================================

/// Account operations, each run as a retryable unit of work.
pub struct Bank<P: SessionProvider> {
    executor: Executor<P>,
    options: RunOptions,
}

impl<P> Bank<P>
where
    P: SessionProvider,
    P::Session: DocumentSession,
{
    /// Create a bank over an executor; `options` apply to every run.
    pub fn new(executor: Executor<P>, options: RunOptions) -> Self {
        Self { executor, options }
    }

    /// Create an account unless it exists. Returns `true` if created.
    pub async fn open_account(&self, id: &str, balance: Decimal) -> CliResult<bool> {
        let created = self
            .executor
            .run_with(self.options.clone(), |session| {
                let id = id.to_string();
                Box::pin(async move {
                    if session.find_one(ACCOUNTS, &id).await?.is_some() {
                        return Ok(false);
                    }
                    session.insert_one(ACCOUNTS, &id, account_body(balance)).await?;
                    Ok(true)
                })
            })
            .await?;

        if created {
            info!(account = %id, %balance, "Account opened");
        }
        Ok(created)
    }

    /// Current balance of an account.
    pub async fn balance(&self, id: &str) -> CliResult<Decimal> {
        let balance = self
            .executor
            .run_with(self.options.clone(), |session| {
                let id = id.to_string();
                Box::pin(async move {
                    match session.find_one(ACCOUNTS, &id).await? {
                        Some(doc) => read_balance(&doc).map(Some).map_err(OpError::fatal),
                        None => Ok(None),
                    }
                })
            })
            .await?;

        balance.ok_or_else(|| CliError::AccountNotFound(id.to_string()))
    }

    /// Move `amount` from one account to another.
    pub async fn transfer(&self, from: &str, to: &str, amount: Decimal) -> CliResult<Receipt> {
        if amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount(amount).into());
        }
        if from == to {
            return Err(TransferError::SameAccount(from.to_string()).into());
        }

        let receipt = self
            .executor
            .run_with(self.options.clone(), |session| {
                let from = from.to_string();
                let to = to.to_string();
                Box::pin(async move { apply_transfer(session, &from, &to, amount).await })
            })
            .await?;

        info!(
            %from,
            %to,
            %amount,
            ledger_id = %receipt.ledger_id,
            from_balance = %receipt.from_balance,
            to_balance = %receipt.to_balance,
            "Transfer committed"
        );
        Ok(receipt)
    }
}

// =============================================================================
// Demo
// =============================================================================

/// Summary of a `demo` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    /// Transfers attempted
    pub transfers: usize,
    /// Transfers committed
    pub committed: usize,
    /// Transfers rejected by a business rule
    pub rejected: usize,
    /// Sum of demo balances before
    pub total_before: Decimal,
    /// Sum of demo balances after
    pub total_after: Decimal,
}

async fn demo_total<P>(bank: &Bank<P>) -> CliResult<Decimal>
where
    P: SessionProvider,
    P::Session: DocumentSession,
{
    let mut total = Decimal::ZERO;
    for (id, _) in demo_accounts() {
        total += bank.balance(id).await?;
    }
    Ok(total)
}

/// Open the demo accounts and run `transfers` concurrent transfers between them.
///
/// Transfers alternate direction with random amounts, so most of them
/// collide on the same two documents and go through the retry path.
pub async fn run_demo<P>(bank: Arc<Bank<P>>, transfers: usize) -> CliResult<DemoReport>
where
    P: SessionProvider + 'static,
    P::Session: DocumentSession,
{
    let [(a, a_balance), (b, b_balance)] = demo_accounts();
    bank.open_account(a, a_balance).await?;
    bank.open_account(b, b_balance).await?;

    let total_before = demo_total(&bank).await?;

    let amounts: Vec<Decimal> = {
        let mut rng = rand::thread_rng();
        (0..transfers).map(|_| Decimal::from(rng.gen_range(1..=50i64))).collect()
    };

    let handles: Vec<_> = amounts
        .into_iter()
        .enumerate()
        .map(|(i, amount)| {
            let bank = Arc::clone(&bank);
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move { bank.transfer(from, to, amount).await })
        })
        .collect();

    let mut committed = 0;
    let mut rejected = 0;
    let mut first_error = None;

    for handle in handles {
        match handle.await {
            Ok(Ok(_)) => committed += 1,
            Ok(Err(CliError::Exec(ExecError::Operation(e)))) => {
                warn!(error = %e, "Transfer rejected");
                rejected += 1;
            },
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            },
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(CliError::Task(e.to_string()));
                }
            },
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let total_after = demo_total(&bank).await?;
    if total_after != total_before {
        return Err(CliError::TotalMismatch {
            before: total_before.to_string(),
            after: total_after.to_string(),
        });
    }

    info!(transfers, committed, rejected, total = %total_after, "Demo finished, total conserved");

    Ok(DemoReport {
        transfers,
        committed,
        rejected,
        total_before,
        total_after,
    })
}

// =============================================================================
// Tests
// =============================================================================
