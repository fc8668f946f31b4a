//! Retry policy and backoff schedule.

use std::time::Duration;

use rand::Rng;

use crate::error::{ExecError, ExecResult};

/// Default number of attempts per run.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Default backoff cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `base * 2^(n-1)` after failed attempt `n`, capped at `max`
    Exponential {
        /// Delay after the first failed attempt
        base: Duration,
        /// Upper bound on any delay
        max: Duration,
        /// Pick a random delay in `[delay / 2, delay]`
        jitter: bool,
    },
}

impl Backoff {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max, jitter } => {
                // Cap the shift to prevent overflow
                let shift = attempt.saturating_sub(1).min(31);
                let delay = base.saturating_mul(1u32 << shift).min(*max);

                if *jitter && !delay.is_zero() {
                    let half = delay / 2;
                    rand::thread_rng().gen_range(half..=delay)
                } else {
                    delay
                }
            },
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: DEFAULT_BACKOFF_BASE,
            max: DEFAULT_BACKOFF_MAX,
            jitter: true,
        }
    }
}

/// How many times a unit of work is attempted, and how long to wait between attempts.
///
/// Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Create a policy with the default backoff.
    ///
    /// Fails if `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> ExecResult<Self> {
        if max_attempts == 0 {
            return Err(ExecError::InvalidPolicy("max_attempts must be at least 1".to_string()));
        }

        Ok(Self { max_attempts, backoff: Backoff::default() })
    }

    /// Single attempt, no retry.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, backoff: Backoff::None }
    }

    /// Replace the backoff schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of attempts (always ≥ 1).
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff schedule.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_attempts_rejected() {
        let result = RetryPolicy::new(0);
        assert!(matches!(result, Err(ExecError::InvalidPolicy(_))));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts(), 3);
        assert!(matches!(policy.backoff(), Backoff::Exponential { jitter: true, .. }));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();

        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_after(1), Duration::ZERO);
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));

        assert_eq!(backoff.delay(1), Duration::from_millis(250));
        assert_eq!(backoff.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
            jitter: false,
        };

        // 10, 20, 40, 80, 100 (capped)
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(4), Duration::from_millis(80));
        assert_eq!(backoff.delay(5), Duration::from_millis(100));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(40),
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..100 {
            let delay = backoff.delay(2);
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(80));
        }
    }
}
