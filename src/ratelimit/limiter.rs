//! Sliding window rate limiter.

use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::key::IdentityKey;
use super::window::{ceil_to_secs, RequestLog};
use crate::clock::{Clock, SystemClock};
use crate::error::{GuardError, Result};
use crate::events::{EventSink, GuardEvent, TracingSink};

/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 5;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Limit applied to every identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    max_requests: u32,
    window: Duration,
}

impl LimiterConfig {
    /// Create a limit of `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(GuardError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(GuardError::Config(
                "window duration must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Maximum requests admitted per key within one window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Length of the rolling window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests still admissible in the current window after this one
    pub remaining_requests: u32,
    /// Nominal window length when allowed; time until the oldest entry
    /// ages out, rounded up to whole seconds, when denied
    pub reset_in: Duration,
    /// Human-readable summary
    pub message: String,
}

impl Decision {
    fn admit(remaining_requests: u32, window: Duration) -> Self {
        Self {
            allowed: true,
            remaining_requests,
            reset_in: window,
            message: "Request allowed".to_string(),
        }
    }

    fn deny(reset_in: Duration) -> Self {
        Self {
            allowed: false,
            remaining_requests: 0,
            reset_in,
            message: format!(
                "Rate limit exceeded! Please wait {} seconds.",
                reset_in.as_secs()
            ),
        }
    }

    /// Turn a denial into [`GuardError::RateLimitExceeded`].
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(GuardError::RateLimitExceeded {
                reset_in: self.reset_in,
            })
        }
    }
}

/// Per-key sliding window limiter.
///
/// Request logs live in a sharded [`DashMap`]. A check holds the write guard
/// of its key's shard for the whole evict/decide/record sequence, so checks
/// for the same key are serialized while checks for keys in other shards run
/// in parallel.
pub struct SlidingWindowLimiter<K = String>
where
    K: IdentityKey,
{
    config: LimiterConfig,
    logs: DashMap<K, RequestLog>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl<K: IdentityKey> SlidingWindowLimiter<K> {
    /// Create a limiter driven by the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter driven by the given clock.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            logs: DashMap::new(),
            clock,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The configured limit.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Check admission for `key` at the limiter's current clock reading.
    pub fn check_now<Q>(&self, key: &Q) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Display + ?Sized,
    {
        self.check_at(key, || self.clock.now())
    }

    /// Check admission for `key` at `now`.
    ///
    /// An admitted request is recorded against the key. A denied one is not.
    /// Expired entries are evicted either way.
    pub fn check<Q>(&self, key: &Q, now: Instant) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Display + ?Sized,
    {
        self.check_at(key, || now)
    }

    /// Reads `now` only once the shard guard is held, so checks for one key
    /// see non-decreasing clock readings.
    fn check_at<Q>(&self, key: &Q, now: impl FnOnce() -> Instant) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Display + ?Sized,
    {
        let window = self.config.window;
        let max_requests = self.config.max_requests as usize;

        trace!(key = %key, "Checking rate limit");

        let decision = {
            let mut log = match self.logs.get_mut(key) {
                Some(log) => log,
                None => self.logs.entry(key.to_owned()).or_default(),
            };

            let now = now();
            log.evict_expired(now, window);
            let count = log.len();

            if count < max_requests {
                log.record(now);
                Decision::admit((max_requests - count - 1) as u32, window)
            } else {
                let reset_in = log
                    .oldest()
                    .map(|oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
                    .unwrap_or(window);
                Decision::deny(ceil_to_secs(reset_in))
            }
        };

        self.sink.record(&GuardEvent::Admission {
            key: key.to_string(),
            allowed: decision.allowed,
            remaining_requests: decision.remaining_requests,
            reset_in: decision.reset_in,
        });

        decision
    }

    /// Number of requests for `key` still inside the window ending at `now`.
    pub fn current_count<Q>(&self, key: &Q, now: Instant) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.logs
            .get(key)
            .map(|log| log.live_count(now, self.config.window))
            .unwrap_or(0)
    }

    /// Evict expired entries everywhere and drop keys left with an empty log.
    ///
    /// Returns the number of keys removed.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let window = self.config.window;
        let before = self.logs.len();
        self.logs.retain(|_, log| {
            log.evict_expired(now, window);
            !log.is_empty()
        });
        let removed = before.saturating_sub(self.logs.len());
        if removed > 0 {
            debug!(removed = removed, remaining = self.logs.len(), "Purged idle keys");
        }
        removed
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.logs.len()
    }

    /// Clear all request logs.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.logs.clear();
    }

    /// Spawn a task that calls [`purge_idle`](Self::purge_idle) every
    /// `interval` until `shutdown` resolves.
    ///
    /// Returns `None` without spawning anything when `interval` is zero.
    pub fn spawn_cleanup_loop<F>(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: F,
    ) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            warn!("Cleanup interval is zero, not starting cleanup loop");
            return None;
        }

        let limiter = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        debug!("Cleanup loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.purge_idle(limiter.clock.now());
                    }
                }
            }
        }))
    }
}

impl<K: IdentityKey> Default for SlidingWindowLimiter<K> {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mocks::MockClock;
    use crate::events::RecordingSink;

    fn limiter(max_requests: u32, window_secs: u64) -> SlidingWindowLimiter {
        let config = LimiterConfig::new(max_requests, Duration::from_secs(window_secs)).unwrap();
        SlidingWindowLimiter::new(config)
    }

    #[test]
    fn test_config_rejects_zero_values() {
        assert!(LimiterConfig::new(0, Duration::from_secs(1)).is_err());
        assert!(LimiterConfig::new(1, Duration::ZERO).is_err());
        assert_eq!(LimiterConfig::default().max_requests(), 5);
        assert_eq!(LimiterConfig::default().window(), Duration::from_secs(60));
    }

    #[test]
    fn test_first_check_is_allowed() {
        let limiter = limiter(5, 60);
        let decision = limiter.check("john", Instant::now());

        assert!(decision.allowed);
        assert_eq!(decision.remaining_requests, 4);
        assert_eq!(decision.reset_in, Duration::from_secs(60));
        assert_eq!(decision.message, "Request allowed");
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_limit_reached_then_denied() {
        let limiter = limiter(5, 60);
        let now = Instant::now();

        let remaining: Vec<u32> = (0..5)
            .map(|_| limiter.check("john", now).remaining_requests)
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let decision = limiter.check("john", now + Duration::from_secs(1));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining_requests, 0);
        assert_eq!(decision.reset_in, Duration::from_secs(59));
        assert_eq!(
            decision.message,
            "Rate limit exceeded! Please wait 59 seconds."
        );
    }

    #[test]
    fn test_denied_check_is_not_recorded() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert!(limiter.check("john", now).allowed);
        assert!(!limiter.check("john", now).allowed);
        assert!(!limiter.check("john", now).allowed);
        assert_eq!(limiter.current_count("john", now), 1);
    }

    #[test]
    fn test_reset_in_rounds_up() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        limiter.check("john", now);
        let decision = limiter.check("john", now + Duration::from_millis(1500));
        assert_eq!(decision.reset_in, Duration::from_secs(59));
    }

    #[test]
    fn test_window_expiry_allows_again() {
        let limiter = limiter(2, 60);
        let now = Instant::now();

        limiter.check("john", now);
        limiter.check("john", now + Duration::from_secs(10));
        assert!(!limiter.check("john", now + Duration::from_secs(20)).allowed);

        // The first entry expires exactly one window after it was recorded.
        let decision = limiter.check("john", now + Duration::from_secs(60));
        assert!(decision.allowed);
        assert_eq!(decision.remaining_requests, 0);
        assert_eq!(limiter.current_count("john", now + Duration::from_secs(60)), 2);
    }

    #[test]
    fn test_different_keys_have_separate_logs() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert!(limiter.check("john", now).allowed);
        assert!(!limiter.check("john", now).allowed);
        assert!(limiter.check("jane", now).allowed);
        assert_eq!(limiter.key_count(), 2);
    }

    #[test]
    fn test_numeric_keys() {
        let config = LimiterConfig::new(1, Duration::from_secs(1)).unwrap();
        let limiter: SlidingWindowLimiter<u64> = SlidingWindowLimiter::new(config);
        let now = Instant::now();

        assert!(limiter.check(&42, now).allowed);
        assert!(!limiter.check(&42, now).allowed);
        assert!(limiter.check(&7, now).allowed);
    }

    #[test]
    fn test_check_now_uses_injected_clock() {
        let start = Instant::now();
        let clock = MockClock::new(start);
        let config = LimiterConfig::new(1, Duration::from_secs(60)).unwrap();
        let limiter: SlidingWindowLimiter =
            SlidingWindowLimiter::with_clock(config, Arc::new(clock.clone()));

        assert!(limiter.check_now("john").allowed);
        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.check_now("john").reset_in, Duration::from_secs(30));
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check_now("john").allowed);
    }

    #[test]
    fn test_purge_idle_removes_only_empty_logs() {
        let limiter = limiter(5, 60);
        let now = Instant::now();

        limiter.check("john", now);
        limiter.check("jane", now + Duration::from_secs(30));

        assert_eq!(limiter.purge_idle(now + Duration::from_secs(10)), 0);
        assert_eq!(limiter.purge_idle(now + Duration::from_secs(60)), 1);
        assert_eq!(limiter.key_count(), 1);
        assert_eq!(limiter.current_count("jane", now + Duration::from_secs(60)), 1);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        let limiter = limiter(5, 60);
        let now = Instant::now();

        let allowed: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| limiter.check("john", now).allowed))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(allowed, 5);
        assert_eq!(limiter.current_count("john", now), 5);
    }

    #[test]
    fn test_decisions_are_reported_to_sink() {
        let sink = RecordingSink::new();
        let config = LimiterConfig::new(1, Duration::from_secs(60)).unwrap();
        let limiter: SlidingWindowLimiter =
            SlidingWindowLimiter::new(config).with_sink(Arc::new(sink.clone()));
        let now = Instant::now();

        limiter.check("john", now);
        limiter.check("john", now);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            GuardEvent::Admission {
                key: "john".to_string(),
                allowed: false,
                remaining_requests: 0,
                reset_in: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn test_into_result() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert!(limiter.check("john", now).into_result().is_ok());
        let err = limiter.check("john", now).into_result().unwrap_err();
        assert!(matches!(err, GuardError::RateLimitExceeded { .. }));
    }

    #[test]
    fn test_clear() {
        let limiter = limiter(5, 60);
        limiter.check("john", Instant::now());
        assert_eq!(limiter.key_count(), 1);

        limiter.clear();
        assert_eq!(limiter.key_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_loop_purges_and_stops() {
        let start = Instant::now();
        let clock = MockClock::new(start);
        let config = LimiterConfig::new(5, Duration::from_secs(1)).unwrap();
        let limiter: Arc<SlidingWindowLimiter> = Arc::new(SlidingWindowLimiter::with_clock(
            config,
            Arc::new(clock.clone()),
        ));

        limiter.check_now("john");
        clock.advance(Duration::from_secs(2));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = limiter
            .spawn_cleanup_loop(Duration::from_millis(100), async move {
                let _ = rx.await;
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(limiter.key_count(), 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_loop_rejects_zero_interval() {
        let limiter: Arc<SlidingWindowLimiter> = Arc::new(SlidingWindowLimiter::default());

        let handle = limiter.spawn_cleanup_loop(Duration::ZERO, futures::future::pending());
        assert!(handle.is_none());
    }

    #[test]
    fn test_out_of_order_checks_keep_oldest_entry() {
        let limiter = limiter(2, 60);
        let t0 = Instant::now();

        assert!(limiter.check("john", t0 + Duration::from_secs(10)).allowed);
        assert!(limiter.check("john", t0).allowed);

        // The oldest admitted request is t0, so it ages out at t0 + 60s.
        let decision = limiter.check("john", t0 + Duration::from_secs(20));
        assert!(!decision.allowed);
        assert_eq!(decision.reset_in, Duration::from_secs(40));
    }
}
