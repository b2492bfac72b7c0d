//! Per-key request log for the sliding window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Timestamps of admitted requests for one key, oldest first.
///
/// An entry is live while `now - entry < window`; an entry exactly one
/// window old is expired.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    entries: VecDeque<Instant>,
}

impl RequestLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry that has aged out of the window ending at `now`.
    pub fn evict_expired(&mut self, now: Instant, window: Duration) {
        self.entries.retain(|&entry| is_live(entry, now, window));
    }

    /// Count live entries without mutating the log.
    pub fn live_count(&self, now: Instant, window: Duration) -> usize {
        self.entries
            .iter()
            .filter(|&&entry| is_live(entry, now, window))
            .count()
    }

    /// Record an admitted request, keeping entries in timestamp order.
    pub fn record(&mut self, at: Instant) {
        let position = self.entries.partition_point(|&entry| entry <= at);
        self.entries.insert(position, at);
    }

    /// The oldest retained entry.
    pub fn oldest(&self) -> Option<Instant> {
        self.entries.front().copied()
    }

    /// Number of retained entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_live(entry: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(entry) < window
}

/// Round a duration up to the next whole second.
pub(crate) fn ceil_to_secs(duration: Duration) -> Duration {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        Duration::from_secs(secs + 1)
    } else {
        Duration::from_secs(secs)
    }
}
