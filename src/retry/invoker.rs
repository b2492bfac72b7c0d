//! Bounded retry of fallible async operations.

use futures::future;
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

use super::policy::RetryPolicy;
use crate::clock::{Sleeper, TokioSleeper};
use crate::error::RetryError;
use crate::events::{EventSink, GuardEvent, TracingSink};

/// Runs an operation until it succeeds or the policy's attempts run out.
///
/// Each call to [`execute`](Self::execute) is independent; the invoker holds
/// no per-call state and can be shared freely.
pub struct RetryingInvoker {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
}

impl RetryingInvoker {
    /// Create an invoker that waits on the tokio timer.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the delay primitive.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The policy this invoker applies.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt `operation` up to `max_attempts` times.
    ///
    /// Returns the first success, or [`RetryError::Exhausted`] carrying the
    /// last failure once every attempt has failed.
    pub async fn execute<T, E, Op, Fut>(&self, operation: Op) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_with_cancel(operation, future::pending()).await
    }

    /// Like [`execute`](Self::execute), but abort as soon as `cancel`
    /// resolves.
    ///
    /// Cancellation is observed both while an attempt is in flight and while
    /// waiting between attempts. The in-flight attempt is dropped and the
    /// call returns [`RetryError::Cancelled`] with the number of attempts
    /// started, including the interrupted one. A signal that has already
    /// resolved stops the call before `operation` is invoked again.
    pub async fn execute_with_cancel<T, E, Op, Fut, C>(
        &self,
        mut operation: Op,
        cancel: C,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        C: Future<Output = ()>,
    {
        futures::pin_mut!(cancel);

        let max_attempts = self.policy.max_attempts();
        let delay = self.policy.delay();
        let mut attempt = 0;

        loop {
            if cancel.as_mut().now_or_never().is_some() {
                return Err(self.cancelled(attempt));
            }

            attempt += 1;
            trace!(attempt = attempt, max_attempts = max_attempts, "Starting attempt");

            let outcome = tokio::select! {
                biased;
                _ = &mut cancel => return Err(self.cancelled(attempt)),
                outcome = operation() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    self.sink.record(&GuardEvent::Succeeded { attempt });
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                self.sink.record(&GuardEvent::Exhausted {
                    attempts: attempt,
                    error: err.to_string(),
                });
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            self.sink.record(&GuardEvent::AttemptFailed {
                attempt,
                max_attempts,
                error: err.to_string(),
                delay,
            });

            tokio::select! {
                biased;
                _ = &mut cancel => return Err(self.cancelled(attempt)),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }

    fn cancelled<E>(&self, attempts: u32) -> RetryError<E> {
        self.sink.record(&GuardEvent::Cancelled { attempts });
        RetryError::Cancelled { attempts }
    }
}

impl Default for RetryingInvoker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
