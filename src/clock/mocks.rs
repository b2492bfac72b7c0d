//! Deterministic time sources for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Clock, Sleeper};

/// Manually driven clock.
///
/// Clones share the same underlying instant, so advancing one clone is
/// visible through all of them.
///
/// ```
/// use callguard::clock::mocks::MockClock;
/// use callguard::clock::Clock;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.current_time.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.current_time.lock() = instant;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.lock()
    }
}

/// Sleeper that returns immediately and records every requested delay.
///
/// When built with [`RecordingSleeper::advancing`], each sleep also moves a
/// [`MockClock`] forward, so simulated elapsed time can be asserted.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
    clock: Option<MockClock>,
}

impl RecordingSleeper {
    /// Create a sleeper that only records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sleeper that records and advances `clock` by each delay.
    pub fn advancing(clock: MockClock) -> Self {
        Self {
            delays: Arc::default(),
            clock: Some(clock),
        }
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Number of sleeps requested so far.
    pub fn sleep_count(&self) -> usize {
        self.delays.lock().len()
    }

    /// Sum of all requested delays.
    pub fn total_slept(&self) -> Duration {
        self.delays.lock().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
        tokio::task::yield_now().await;
    }
}
