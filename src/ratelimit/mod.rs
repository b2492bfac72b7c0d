//! Sliding window admission control.

mod key;
mod limiter;
mod window;

pub use key::IdentityKey;
pub use limiter::{
    Decision, LimiterConfig, SlidingWindowLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW,
};
pub use window::RequestLog;
