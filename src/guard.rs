//! Admission control and retry composed into a single call path.
//!
//! A [`Guard`] checks the limiter once per outer request. Denied requests
//! return straight away without touching the operation. Admitted requests go
//! through the invoker, and its retries are not checked against the limiter
//! again: one caller-visible request consumes exactly one admission slot no
//! matter how many attempts it takes.

use std::borrow::Borrow;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::config::GuardConfig;
use crate::error::{Result, RetryError};
use crate::ratelimit::{Decision, IdentityKey, SlidingWindowLimiter};
use crate::retry::RetryingInvoker;

/// Why a guarded call did not produce a value.
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// The limiter denied the request; no attempt was made.
    #[error("{}", .0.message)]
    RateLimited(Decision),

    /// The request was admitted but every attempt failed, or it was cancelled.
    #[error(transparent)]
    Retry(#[from] RetryError<E>),
}

impl<E> CallError<E> {
    /// The denial, if the limiter rejected the call.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            CallError::RateLimited(decision) => Some(decision),
            CallError::Retry(_) => None,
        }
    }
}

/// A limiter and an invoker sharing one call path.
pub struct Guard<K = String>
where
    K: IdentityKey,
{
    limiter: Arc<SlidingWindowLimiter<K>>,
    invoker: RetryingInvoker,
}

impl<K: IdentityKey> Guard<K> {
    /// Compose an existing limiter and invoker.
    pub fn new(limiter: Arc<SlidingWindowLimiter<K>>, invoker: RetryingInvoker) -> Self {
        Self { limiter, invoker }
    }

    /// Build both components from configuration, using the system clock and
    /// the tokio timer.
    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        let limiter = SlidingWindowLimiter::new(config.limiter_config()?);
        let invoker = RetryingInvoker::new(config.retry_policy()?);
        Ok(Self::new(Arc::new(limiter), invoker))
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter<K>> {
        &self.limiter
    }

    /// The invoker.
    pub fn invoker(&self) -> &RetryingInvoker {
        &self.invoker
    }

    /// Admit `key`, then run `operation` with retries.
    pub async fn call<Q, T, E, Op, Fut>(
        &self,
        key: &Q,
        operation: Op,
    ) -> std::result::Result<T, CallError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Display + ?Sized,
        Op: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.call_with_cancel(key, operation, futures::future::pending())
            .await
    }

    /// Like [`call`](Self::call), aborting the retry sequence when `cancel`
    /// resolves.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn call_with_cancel<Q, T, E, Op, Fut, C>(
        &self,
        key: &Q,
        operation: Op,
        cancel: C,
    ) -> std::result::Result<T, CallError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Display + ?Sized,
        Op: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        C: Future<Output = ()>,
    {
        let decision = self.limiter.check_now(key);
        if !decision.allowed {
            return Err(CallError::RateLimited(decision));
        }

        Ok(self.invoker.execute_with_cancel(operation, cancel).await?)
    }
}
