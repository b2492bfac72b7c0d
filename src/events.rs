//! Structured events emitted by the limiter and the invoker.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Something observable happened inside a guard component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardEvent {
    /// An admission decision was made for a key.
    Admission {
        key: String,
        allowed: bool,
        remaining_requests: u32,
        reset_in: Duration,
    },
    /// An attempt failed and another one will follow after `delay`.
    AttemptFailed {
        attempt: u32,
        max_attempts: u32,
        error: String,
        delay: Duration,
    },
    /// The operation succeeded on `attempt`.
    Succeeded { attempt: u32 },
    /// The final attempt failed.
    Exhausted { attempts: u32, error: String },
    /// The retry sequence was aborted.
    Cancelled { attempts: u32 },
}

/// Pluggable destination for [`GuardEvent`]s.
pub trait EventSink: Send + Sync {
    /// Record a single event.
    fn record(&self, event: &GuardEvent);
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &GuardEvent) {
        match event {
            GuardEvent::Admission {
                key,
                allowed: true,
                remaining_requests,
                ..
            } => {
                debug!(key = %key, remaining = remaining_requests, "Request admitted");
            }
            GuardEvent::Admission {
                key,
                allowed: false,
                reset_in,
                ..
            } => {
                warn!(
                    key = %key,
                    reset_in_ms = reset_in.as_millis() as u64,
                    "Rate limit exceeded"
                );
            }
            GuardEvent::AttemptFailed {
                attempt,
                max_attempts,
                error,
                delay,
            } => {
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
            }
            GuardEvent::Succeeded { attempt } => {
                debug!(attempt = attempt, "Operation succeeded");
            }
            GuardEvent::Exhausted { attempts, error } => {
                error!(attempts = attempts, error = %error, "Retries exhausted");
            }
            GuardEvent::Cancelled { attempts } => {
                info!(attempts = attempts, "Retry sequence cancelled");
            }
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<GuardEvent>>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().clone()
    }

    /// Number of failed attempts that were followed by a retry.
    pub fn retry_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, GuardEvent::AttemptFailed { .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &GuardEvent) {
        self.events.lock().push(event.clone());
    }
}
