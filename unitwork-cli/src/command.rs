//! Command-line parsing.

use crate::error::{CliError, CliResult};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Usage text shown on bad input.
pub const USAGE: &str = "unitwork <transfer <from> <to> <amount> | balance <account> | demo [--transfers N] | db <migrate|status|seed>>";

/// Default number of concurrent transfers for `demo`.
pub const DEFAULT_DEMO_TRANSFERS: usize = 20;

/// A parsed CLI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Move funds between two accounts
    Transfer {
        /// Source account
        from: String,
        /// Destination account
        to: String,
        /// Amount to move
        amount: Decimal,
    },
    /// Print an account balance
    Balance {
        /// Account ID
        account: String,
    },
    /// Run concurrent transfers between the demo accounts
    Demo {
        /// Number of transfers
        transfers: usize,
    },
    /// Database lifecycle subcommand (arguments after `db`)
    Db {
        /// Subcommand and its options
        args: Vec<String>,
    },
}

impl Command {
    /// Parse arguments (program name excluded).
    pub fn parse(args: &[String]) -> CliResult<Self> {
        let usage = || CliError::Usage(USAGE.to_string());

        match args.first().map(String::as_str) {
            Some("transfer") => {
                let [_, from, to, amount] = args else {
                    return Err(usage());
                };
                let amount = Decimal::from_str(amount)
                    .map_err(|_| CliError::Usage(format!("invalid amount: {}", amount)))?;
                Ok(Command::Transfer {
                    from: from.clone(),
                    to: to.clone(),
                    amount,
                })
            },
            Some("balance") => match args {
                [_, account] => Ok(Command::Balance {
                    account: account.clone(),
                }),
                _ => Err(usage()),
            },
            Some("demo") => {
                let mut transfers = DEFAULT_DEMO_TRANSFERS;

                // Parse optional arguments
                let mut i = 1;
                while i < args.len() {
                    match args[i].as_str() {
                        "--transfers" => {
                            let value = args
                                .get(i + 1)
                                .ok_or_else(|| CliError::Usage("--transfers requires a value".to_string()))?;
                            transfers = value
                                .parse()
                                .map_err(|_| CliError::Usage(format!("invalid --transfers: {}", value)))?;
                            i += 2;
                        },
                        other => return Err(CliError::Usage(format!("unknown option: {}", other))),
                    }
                }

                Ok(Command::Demo { transfers })
            },
            Some("db") if args.len() >= 2 => Ok(Command::Db {
                args: args[1..].to_vec(),
            }),
            _ => Err(usage()),
        }
    }
}
