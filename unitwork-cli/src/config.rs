//! CLI configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{CliError, CliResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use unitwork_exec::{Backoff, RetryPolicy};

// =============================================================================
// Configuration
// =============================================================================

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store backend configuration
    pub store: StoreConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Per-run deadline (`None` = no deadline)
    pub deadline: Option<Duration>,

    /// Emit JSON log lines
    pub log_json: bool,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Store backend configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Which store to run against
    pub backend: Backend,
    /// PostgreSQL connection string (required for `Backend::Postgres`)
    pub database_url: Option<String>,
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per unit of work
    pub max_attempts: u32,
    /// First backoff delay (0 = retry immediately)
    pub backoff_base: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
    /// Randomize each delay within [delay/2, delay]
    pub jitter: bool,
}

/// Store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-memory store seeded with demo accounts
    Memory,
    /// PostgreSQL (`DATABASE_URL`)
    Postgres,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> CliResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> CliResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Self::load_environment(&lookup)?;
        let store = Self::load_store_config(&lookup)?;
        let retry = Self::load_retry_config(&lookup)?;

        let deadline = match Self::load_parsed::<u64, _>(&lookup, "UNITWORK_DEADLINE_MS")? {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        };
        let log_json = Self::load_parsed(&lookup, "UNITWORK_LOG_JSON")?.unwrap_or(false);

        Ok(Self {
            store,
            retry,
            deadline,
            log_json,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            store: StoreConfig {
                backend: Backend::Memory,
                database_url: None,
            },
            retry: RetryConfig {
                max_attempts: 10,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(10),
                jitter: false,
            },
            deadline: None,
            log_json: false,
            environment: Environment::Test,
        }
    }

    /// Build the retry policy described by this configuration.
    pub fn retry_policy(&self) -> CliResult<RetryPolicy> {
        let backoff = if self.retry.backoff_base.is_zero() {
            Backoff::None
        } else {
            Backoff::Exponential {
                base: self.retry.backoff_base,
                max: self.retry.backoff_max,
                jitter: self.retry.jitter,
            }
        };

        RetryPolicy::new(self.retry.max_attempts)
            .map(|policy| policy.with_backoff(backoff))
            .map_err(|e| CliError::Config(e.to_string()))
    }

    fn load_environment<F: Fn(&str) -> Option<String>>(lookup: &F) -> CliResult<Environment> {
        let env_str = lookup("UNITWORK_ENV").unwrap_or_else(|| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(CliError::Config(format!(
                "Invalid UNITWORK_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_store_config<F: Fn(&str) -> Option<String>>(lookup: &F) -> CliResult<StoreConfig> {
        let backend_str = lookup("UNITWORK_BACKEND").unwrap_or_else(|| "memory".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "memory" => Backend::Memory,
            "postgres" | "postgresql" => Backend::Postgres,
            other => {
                return Err(CliError::Config(format!(
                    "Invalid UNITWORK_BACKEND: {}. Expected: memory, postgres",
                    other
                )))
            },
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(CliError::Config(
                "DATABASE_URL is required when UNITWORK_BACKEND=postgres".to_string(),
            ));
        }

        Ok(StoreConfig {
            backend,
            database_url,
        })
    }

    fn load_retry_config<F: Fn(&str) -> Option<String>>(lookup: &F) -> CliResult<RetryConfig> {
        let max_attempts: u32 = Self::load_parsed(lookup, "UNITWORK_MAX_ATTEMPTS")?.unwrap_or(5);
        if max_attempts == 0 {
            return Err(CliError::Config("UNITWORK_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        let base_ms: u64 = Self::load_parsed(lookup, "UNITWORK_BACKOFF_BASE_MS")?.unwrap_or(10);
        let max_ms: u64 = Self::load_parsed(lookup, "UNITWORK_BACKOFF_MAX_MS")?.unwrap_or(1000);
        if max_ms < base_ms {
            return Err(CliError::Config(format!(
                "UNITWORK_BACKOFF_MAX_MS ({}) is below UNITWORK_BACKOFF_BASE_MS ({})",
                max_ms, base_ms
            )));
        }
        let jitter = Self::load_parsed(lookup, "UNITWORK_BACKOFF_JITTER")?.unwrap_or(true);

        Ok(RetryConfig {
            max_attempts,
            backoff_base: Duration::from_millis(base_ms),
            backoff_max: Duration::from_millis(max_ms),
            jitter,
        })
    }

    fn load_parsed<T, F>(lookup: &F, key: &str) -> CliResult<Option<T>>
    where
        T: FromStr,
        F: Fn(&str) -> Option<String>,
    {
        match lookup(key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| CliError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(None),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                backend: Backend::Memory,
                database_url: None,
            },
            retry: RetryConfig {
                max_attempts: 5,
                backoff_base: Duration::from_millis(10),
                backoff_max: Duration::from_millis(1000),
                jitter: true,
            },
            deadline: None,
            log_json: false,
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Postgres => write!(f, "postgres"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> CliResult<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let config = load(&[]).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base, Duration::from_millis(10));
        assert!(config.retry.jitter);
        assert!(config.deadline.is_none());
        assert!(!config.log_json);
    }

    #[test]
    fn test_full_env() {
        let config = load(&[
            ("UNITWORK_ENV", "prod"),
            ("UNITWORK_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/unitwork"),
            ("UNITWORK_MAX_ATTEMPTS", "8"),
            ("UNITWORK_BACKOFF_BASE_MS", "5"),
            ("UNITWORK_BACKOFF_MAX_MS", "200"),
            ("UNITWORK_BACKOFF_JITTER", "false"),
            ("UNITWORK_DEADLINE_MS", "2500"),
            ("UNITWORK_LOG_JSON", "true"),
        ])
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.store.backend, Backend::Postgres);
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://localhost/unitwork"));
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.backoff_max, Duration::from_millis(200));
        assert!(!config.retry.jitter);
        assert_eq!(config.deadline, Some(Duration::from_millis(2500)));
        assert!(config.log_json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(load(&[("UNITWORK_ENV", "staging")]), Err(CliError::Config(_))));
        assert!(matches!(load(&[("UNITWORK_BACKEND", "redis")]), Err(CliError::Config(_))));
        assert!(matches!(load(&[("UNITWORK_MAX_ATTEMPTS", "0")]), Err(CliError::Config(_))));
        assert!(matches!(load(&[("UNITWORK_MAX_ATTEMPTS", "many")]), Err(CliError::Config(_))));
        assert!(matches!(load(&[("UNITWORK_BACKOFF_JITTER", "maybe")]), Err(CliError::Config(_))));
        assert!(matches!(
            load(&[("UNITWORK_BACKOFF_BASE_MS", "100"), ("UNITWORK_BACKOFF_MAX_MS", "10")]),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let result = load(&[("UNITWORK_BACKEND", "postgres")]);
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("DATABASE_URL")));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = Config::default().retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), 5);
        assert!(matches!(policy.backoff(), Backoff::Exponential { jitter: true, .. }));

        let mut config = Config::test();
        config.retry.backoff_base = Duration::ZERO;
        assert_eq!(config.retry_policy().unwrap().backoff(), &Backoff::None);
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Backend::Postgres.to_string(), "postgres");
    }
}
