//! Core library for the `tpsearch` CLI.
//!
//! The building blocks are usable on their own: a token-bucket
//! [`rate::RateLimiter`], a bounded [`exec::ConcurrentExecutor`], the
//! [`search::PerformanceSearch`] that ramps an executor until error rate or
//! latency thresholds break, and the [`correlation`] engine that threads
//! values extracted from one response into the next request.
pub mod args;
pub mod config;
pub mod correlation;
pub mod error;
pub mod exec;
pub mod http;
pub mod metrics;
pub mod params;
pub mod rate;
pub mod search;
pub mod shutdown;
