use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::metrics::LatencyPercentiles;

#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LimiterMode {
    /// Continuous refill up to the burst capacity.
    #[default]
    TokenBucket,
    /// Admissions evenly spaced by `per / rate`, no bursting.
    FixedInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Tokens added per `per`.
    pub rate: u64,
    pub per: Duration,
    /// Maximum tokens held. Defaults to `rate`.
    pub burst: Option<u64>,
    pub mode: LimiterMode,
}

impl RateLimiterConfig {
    #[must_use]
    pub const fn per_second(rate: u64) -> Self {
        Self {
            rate,
            per: Duration::from_secs(1),
            burst: None,
            mode: LimiterMode::TokenBucket,
        }
    }

    #[must_use]
    pub const fn with_burst(mut self, burst: u64) -> Self {
        self.burst = Some(burst);
        self
    }

    #[must_use]
    pub const fn with_period(mut self, per: Duration) -> Self {
        self.per = per;
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: LimiterMode) -> Self {
        self.mode = mode;
        self
    }

    /// Tokens the bucket can hold. Fixed-interval mode never banks tokens.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        match self.mode {
            LimiterMode::TokenBucket => self.burst.unwrap_or(self.rate).max(1),
            LimiterMode::FixedInterval => 1,
        }
    }

    /// Checks the configuration before any limiter is built.
    ///
    /// # Errors
    ///
    /// Returns an error when the rate, period, or burst is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rate == 0 {
            return Err(ValidationError::RateZero);
        }
        if self.per.is_zero() {
            return Err(ValidationError::RatePeriodZero);
        }
        if self.burst == Some(0) {
            return Err(ValidationError::BurstZero);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub admitted: u64,
    /// Acquisitions abandoned by `acquire_timeout`.
    pub rejected: u64,
    pub rate: u64,
    pub per_ms: u64,
    pub capacity: u64,
    pub mode: LimiterMode,
    pub wait_p50_us: u64,
    pub wait_p95_us: u64,
    pub wait_p99_us: u64,
    pub wait_max_us: u64,
}

impl LimiterStats {
    pub(super) fn new(
        config: &RateLimiterConfig,
        admitted: u64,
        rejected: u64,
        wait: LatencyPercentiles,
        wait_max_us: u64,
    ) -> Self {
        Self {
            admitted,
            rejected,
            rate: config.rate,
            per_ms: u64::try_from(config.per.as_millis()).unwrap_or(u64::MAX),
            capacity: config.capacity(),
            mode: config.mode,
            wait_p50_us: wait.p50_us,
            wait_p95_us: wait.p95_us,
            wait_p99_us: wait.p99_us,
            wait_max_us,
        }
    }
}
