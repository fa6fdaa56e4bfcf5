use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{ExecError, ValidationError};
use crate::metrics::LatencyHistogram;

use super::types::{LimiterMode, LimiterStats, RateLimiterConfig};

/// Bucket levels are tracked in micro-tokens.
const MICRO_TOKENS: u128 = 1_000_000;
/// Floor for computed waits so a starved caller never spins.
const MIN_WAIT: Duration = Duration::from_micros(50);

#[derive(Debug)]
struct BucketState {
    config: RateLimiterConfig,
    level: u128,
    last_refill: Instant,
    next_slot: Instant,
    waits: Option<LatencyHistogram>,
}

impl BucketState {
    fn capacity(&self) -> u128 {
        u128::from(self.config.capacity()).saturating_mul(MICRO_TOKENS)
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_nanos();
        if elapsed == 0 {
            return;
        }
        let per_nanos = self.config.per.as_nanos().max(1);
        let added = elapsed
            .saturating_mul(u128::from(self.config.rate))
            .saturating_mul(MICRO_TOKENS)
            .checked_div(per_nanos)
            .unwrap_or(0);
        if added == 0 {
            return;
        }
        self.level = self.level.saturating_add(added).min(self.capacity());
        self.last_refill = now;
    }

    fn interval(&self) -> Duration {
        let nanos = self
            .config
            .per
            .as_nanos()
            .checked_div(u128::from(self.config.rate))
            .unwrap_or(0);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Debits one token, or reports how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        match self.config.mode {
            LimiterMode::TokenBucket => {
                self.refill(now);
                if self.level >= MICRO_TOKENS {
                    self.level = self.level.saturating_sub(MICRO_TOKENS);
                    return Ok(());
                }
                let deficit = MICRO_TOKENS.saturating_sub(self.level);
                let per_second = u128::from(self.config.rate).saturating_mul(MICRO_TOKENS);
                let nanos = deficit
                    .saturating_mul(self.config.per.as_nanos())
                    .saturating_add(per_second.saturating_sub(1))
                    .checked_div(per_second)
                    .unwrap_or(0);
                let wait = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
                Err(wait.max(MIN_WAIT))
            }
            LimiterMode::FixedInterval => {
                if now >= self.next_slot {
                    self.next_slot = now.checked_add(self.interval()).unwrap_or(now);
                    return Ok(());
                }
                Err(self.next_slot.saturating_duration_since(now).max(MIN_WAIT))
            }
        }
    }

    fn record_wait(&mut self, waited: Duration) {
        if let Some(waits) = self.waits.as_mut() {
            let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
            if let Err(err) = waits.record(micros) {
                warn!("Dropping rate limiter wait sample: {}", err);
            }
        }
    }
}

/// Shared admission gate. Callers serialize on the bucket state; the lock is
/// never held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Builds a limiter with a full bucket.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid.
    pub fn new(config: RateLimiterConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let now = Instant::now();
        let waits = match LatencyHistogram::new() {
            Ok(histogram) => Some(histogram),
            Err(err) => {
                warn!("Rate limiter wait stats disabled: {}", err);
                None
            }
        };
        let state = BucketState {
            config,
            level: u128::from(config.capacity()).saturating_mul(MICRO_TOKENS),
            last_refill: now,
            next_slot: now,
            waits,
        };
        Ok(Self {
            state: Mutex::new(state),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until a token is available and debits it.
    pub async fn acquire(&self) {
        let started = Instant::now();
        loop {
            let outcome = self.lock_state().try_take(Instant::now());
            match outcome {
                Ok(()) => {
                    self.note_admitted(started);
                    return;
                }
                Err(wait) => sleep(wait).await,
            }
        }
    }

    /// Like [`RateLimiter::acquire`], but gives up after `limit`.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::Timeout` when no token became available in time.
    pub async fn acquire_timeout(&self, limit: Duration) -> Result<(), ExecError> {
        match tokio::time::timeout(limit, self.acquire()).await {
            Ok(()) => Ok(()),
            Err(_elapsed) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Rate limiter acquire timed out after {:?}", limit);
                Err(ExecError::Timeout {
                    context: "a rate limiter token",
                    elapsed: limit,
                })
            }
        }
    }

    /// Takes a token only if one is available right now.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let admitted = self.lock_state().try_take(Instant::now()).is_ok();
        if admitted {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Changes the refill rate; the current level is clamped to the new
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns an error when the new rate is zero.
    pub fn update_rate(&self, rate: u64) -> Result<(), ValidationError> {
        let mut state = self.lock_state();
        let mut config = state.config;
        config.rate = rate;
        config.validate()?;
        state.refill(Instant::now());
        state.config = config;
        state.level = state.level.min(state.capacity());
        debug!("Rate limiter updated to {} per {:?}", rate, config.per);
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> RateLimiterConfig {
        self.lock_state().config
    }

    /// Whole tokens currently banked.
    #[must_use]
    pub fn available(&self) -> u64 {
        let mut state = self.lock_state();
        state.refill(Instant::now());
        let whole = state.level.checked_div(MICRO_TOKENS).unwrap_or(0);
        u64::try_from(whole).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let state = self.lock_state();
        let (wait, wait_max_us) = state
            .waits
            .as_ref()
            .map(|waits| (waits.percentiles(), waits.max()))
            .unwrap_or_default();
        LimiterStats::new(
            &state.config,
            self.admitted.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            wait,
            wait_max_us,
        )
    }

    fn note_admitted(&self, started: Instant) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.lock_state().record_wait(started.elapsed());
    }
}
