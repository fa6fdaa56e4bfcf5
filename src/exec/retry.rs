use std::time::Duration;

use crate::error::ValidationError;

/// Per-task retry policy. Only `TaskError::Failed` outcomes are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier: 2,
        }
    }

    #[must_use]
    pub const fn with_multiplier(mut self, backoff_multiplier: u32) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// # Errors
    ///
    /// Returns an error when attempts or the multiplier is zero.
    pub const fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::RetryAttemptsZero);
        }
        if self.backoff_multiplier == 0 {
            return Err(ValidationError::RetryMultiplierZero);
        }
        Ok(())
    }

    /// Delay before the attempt that follows `attempt` (1-based):
    /// `base_delay * multiplier^(attempt - 1)`, saturating.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.backoff_multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}
