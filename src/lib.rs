//! Callguard - client-side request resilience
//!
//! This crate provides two cooperating pieces for outbound call paths:
//! a per-identity sliding window limiter that decides whether a request may
//! proceed, and a retrying invoker that runs a fallible async operation a
//! bounded number of times with a fixed delay between attempts. [`Guard`]
//! composes the two so that one outer request consumes one admission slot.
//!
//! ```
//! use callguard::ratelimit::{LimiterConfig, SlidingWindowLimiter};
//! use std::time::{Duration, Instant};
//!
//! let limiter: SlidingWindowLimiter =
//!     SlidingWindowLimiter::new(LimiterConfig::new(5, Duration::from_secs(60)).unwrap());
//! let now = Instant::now();
//!
//! let decision = limiter.check("john", now);
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining_requests, 4);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod ratelimit;
pub mod retry;

pub use config::GuardConfig;
pub use error::{GuardError, Result, RetryError};
pub use guard::{CallError, Guard};
