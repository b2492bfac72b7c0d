//! Fixed-delay retry policy.

use std::time::Duration;

use crate::error::{GuardError, Result};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy of at most `max_attempts` attempts spaced by `delay`.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(GuardError::Config(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay applied after each failed attempt that is not the last.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}
