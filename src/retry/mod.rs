//! Bounded, fixed-delay retry of fallible operations.

mod invoker;
mod policy;

pub use invoker::RetryingInvoker;
pub use policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
