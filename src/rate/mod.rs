//! Admission control: token bucket and fixed-interval rate limiting.
mod limiter;
mod types;


pub use limiter::RateLimiter;
pub use types::{LimiterMode, LimiterStats, RateLimiterConfig};
