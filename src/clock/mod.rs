//! Time sources used by the limiter and the retrying invoker.
//!
//! Neither component reads the wall clock directly. The limiter asks a
//! [`Clock`] for "now" and the invoker waits through a [`Sleeper`], so tests
//! can drive both with [`mocks::MockClock`] and [`mocks::RecordingSleeper`].

pub mod mocks;

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Non-blocking delay primitive.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// System clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
