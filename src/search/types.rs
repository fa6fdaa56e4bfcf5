use std::collections::BTreeMap;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::exec::RetryPolicy;
use crate::metrics::LabelSummary;
use crate::rate::RateLimiterConfig;

const DEFAULT_MAX_ERROR_RATE_X100: u64 = 500;
const DEFAULT_MAX_P95_LATENCY: Duration = Duration::from_secs(1);
const DEFAULT_TASKS_PER_WORKER: u64 = 10;
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// What a search level means.
#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchAxis {
    /// Level is the worker count.
    #[default]
    Concurrency,
    /// Level is a target rate per second enforced by a fresh token bucket.
    Rate,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RampKind {
    Linear,
    #[default]
    Exponential,
    Binary,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RampStrategy {
    Linear { step: u64 },
    Exponential,
    Binary,
}

impl RampStrategy {
    #[must_use]
    pub const fn new(kind: RampKind, step: u64) -> Self {
        match kind {
            RampKind::Linear => Self::Linear { step },
            RampKind::Exponential => Self::Exponential,
            RampKind::Binary => Self::Binary,
        }
    }
}

/// Pass criteria. A trial passes only when both hold.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Thresholds {
    /// Highest accepted error percentage x100 (`500` is 5%).
    pub max_error_rate_x100: u64,
    pub max_p95_latency: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_error_rate_x100: DEFAULT_MAX_ERROR_RATE_X100,
            max_p95_latency: DEFAULT_MAX_P95_LATENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPlan {
    /// A fixed batch of `tasks_per_worker * workers` tasks.
    Batch { tasks_per_worker: u64 },
    /// Open-ended load for a fixed wall-clock time.
    Duration(Duration),
}

impl Default for TrialPlan {
    fn default() -> Self {
        Self::Batch {
            tasks_per_worker: DEFAULT_TASKS_PER_WORKER,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub axis: SearchAxis,
    pub initial_level: u64,
    pub max_level: u64,
    pub strategy: RampStrategy,
    pub thresholds: Thresholds,
    pub trial: TrialPlan,
    /// Concurrency axis: optional limiter applied to every trial.
    /// Rate axis: template for the per-trial bucket (period, burst, mode).
    pub rate: Option<RateLimiterConfig>,
    /// Pause between consecutive trials.
    pub cooldown: Duration,
    pub grace_period: Duration,
    pub retry: Option<RetryPolicy>,
}

impl SearchConfig {
    #[must_use]
    pub fn new(max_level: u64) -> Self {
        Self {
            axis: SearchAxis::Concurrency,
            initial_level: 1,
            max_level,
            strategy: RampStrategy::Exponential,
            thresholds: Thresholds::default(),
            trial: TrialPlan::default(),
            rate: None,
            cooldown: Duration::ZERO,
            grace_period: DEFAULT_GRACE_PERIOD,
            retry: None,
        }
    }

    /// Rejects configurations that cannot produce a meaningful search.
    ///
    /// # Errors
    ///
    /// Returns an error for zero or inverted levels, a zero step or batch,
    /// a zero trial duration, or an invalid rate or retry setting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_level == 0 {
            return Err(ValidationError::MaxLevelZero);
        }
        if self.initial_level == 0 {
            return Err(ValidationError::InitialLevelZero);
        }
        if self.initial_level > self.max_level {
            return Err(ValidationError::InitialAboveMax {
                initial: self.initial_level,
                max: self.max_level,
            });
        }
        if matches!(self.strategy, RampStrategy::Linear { step: 0 }) {
            return Err(ValidationError::LinearStepZero);
        }
        match self.trial {
            TrialPlan::Batch {
                tasks_per_worker: 0,
            } => return Err(ValidationError::TrialBatchZero),
            TrialPlan::Duration(duration) if duration.is_zero() => {
                return Err(ValidationError::DurationZero);
            }
            TrialPlan::Batch { .. } | TrialPlan::Duration(_) => {}
        }
        if let Some(rate) = self.rate.as_ref() {
            rate.validate()?;
        }
        if let Some(retry) = self.retry.as_ref() {
            retry.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrialVerdict {
    Pass,
    ErrorRateExceeded,
    LatencyExceeded,
    ErrorRateAndLatencyExceeded,
    /// Rate axis only: less than 90% of the target rate was achieved.
    BelowTargetRate,
    NoData,
}

impl TrialVerdict {
    #[must_use]
    pub const fn passed(self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// One trial of the search history.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Trial {
    pub level: u64,
    pub concurrency: usize,
    /// Target rate per second on the rate axis.
    pub rate_limit: Option<u64>,
    pub total: u64,
    pub successes: u64,
    pub error_rate_x100: u64,
    pub throughput_x100: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
    pub mean_latency_us: u64,
    pub duration_ms: u64,
    pub verdict: TrialVerdict,
    /// Per-request breakdown when the workload mixes labelled requests.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_label: BTreeMap<String, LabelSummary>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Best throughput (x100) among passing trials.
    pub max_throughput_x100: u64,
    /// Level of the trial that produced `max_throughput_x100`, 0 when none
    /// passed.
    pub optimal_level: u64,
    pub optimal_concurrency: usize,
    /// Where the pass/fail bracket converged. Can sit above `optimal_level`
    /// when throughput drops before the thresholds break.
    pub highest_passing_level: u64,
    pub trials: Vec<Trial>,
    /// The configured maximum level passed.
    pub ceiling_reached: bool,
    pub no_passing_level: bool,
    /// Stopped early by the shutdown signal.
    pub interrupted: bool,
}
