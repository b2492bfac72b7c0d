//! Error types for callguard.

use std::time::Duration;
use thiserror::Error;

/// Main error type for callguard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limiter denied admission for the caller.
    #[error("Rate limit exceeded, retry in {}s", .reset_in.as_secs())]
    RateLimitExceeded {
        /// Time until the oldest in-window request ages out
        reset_in: Duration,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GuardError {
    fn from(err: ::config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

/// Terminal failure of a retried operation.
///
/// Intermediate attempt failures never surface here; only the outcome of the
/// whole sequence does.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed. Wraps the last failure.
    #[error("Failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// The failure reported by the final attempt
        source: E,
    },

    /// A cancellation signal fired before the sequence completed.
    #[error("Cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Number of attempts started before cancellation
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before the sequence terminated.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => {
                *attempts
            }
        }
    }

    /// Whether the sequence ended because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The last operation failure, if the sequence ran to exhaustion.
    pub fn last_failure(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Result type alias for callguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
