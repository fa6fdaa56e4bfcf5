use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::args::PositiveUsize;
use crate::error::{AppError, AppResult};
use crate::exec::{ConcurrentExecutor, ExecutorConfig, TaskFactory};
use crate::metrics::{MetricsAggregator, MetricsSummary, format_x100};
use crate::rate::{RateLimiter, RateLimiterConfig};
use crate::shutdown::{ShutdownReceiver, is_shutdown, wait_for_shutdown};

use super::types::{
    RampStrategy, SearchAxis, SearchConfig, SearchOutcome, Thresholds, Trial, TrialPlan,
    TrialVerdict,
};

/// Rate axis: a trial must reach this share of its target.
const TARGET_RATE_PERCENT: u64 = 90;
/// Rate axis: workers per unit of target rate, and the floor.
const RATE_WORKERS_PER_LEVEL: u64 = 2;
const RATE_MIN_WORKERS: u64 = 10;

/// Drives a [`ConcurrentExecutor`] through increasing levels and reports the
/// highest level that meets the thresholds.
pub struct PerformanceSearch {
    config: SearchConfig,
    shutdown_rx: Option<ShutdownReceiver>,
}

impl PerformanceSearch {
    /// # Errors
    ///
    /// Returns `InvalidConfig` before any trial runs when the configuration
    /// is rejected.
    pub fn new(config: SearchConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::validation)?;
        Ok(Self {
            config,
            shutdown_rx: None,
        })
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown_rx: ShutdownReceiver) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs trials until the bracket between the last passing and the first
    /// failing level converges, or the maximum level passes.
    ///
    /// # Errors
    ///
    /// Returns an error when a trial cannot be set up (limiter or executor
    /// construction). Task failures are data, not errors.
    pub async fn find_max_throughput(
        &self,
        factory: Arc<dyn TaskFactory>,
    ) -> AppResult<SearchOutcome> {
        let mut run = SearchRun {
            search: self,
            factory,
            aggregator: MetricsAggregator::new(),
            verdicts: BTreeMap::new(),
            trials: Vec::new(),
            interrupted: false,
        };
        let max = self.config.max_level;
        let initial = self.config.initial_level;

        // Bracket: `good` passed (0 is virtual), `bad` failed (max + 1 is virtual).
        let mut good: u64 = 0;
        let mut bad: u64 = max.saturating_add(1);

        match run.try_level(initial).await? {
            None => return Ok(run.finish(good)),
            Some(true) => good = initial,
            Some(false) => bad = initial,
        }

        if good == initial {
            match self.config.strategy {
                RampStrategy::Linear { step } => {
                    while good < max {
                        let next = good.saturating_add(step).min(max);
                        match run.try_level(next).await? {
                            None => return Ok(run.finish(good)),
                            Some(true) => good = next,
                            Some(false) => break,
                        }
                    }
                    return Ok(run.finish(good));
                }
                RampStrategy::Exponential => {
                    while good < max {
                        let next = good.saturating_mul(2).min(max);
                        match run.try_level(next).await? {
                            None => return Ok(run.finish(good)),
                            Some(true) => good = next,
                            Some(false) => {
                                bad = next;
                                break;
                            }
                        }
                    }
                }
                RampStrategy::Binary => {}
            }
        }

        while bad.saturating_sub(good) > 1 {
            let mid = good.saturating_add(bad.saturating_sub(good) / 2);
            match run.try_level(mid).await? {
                None => return Ok(run.finish(good)),
                Some(true) => good = mid,
                Some(false) => bad = mid,
            }
        }
        Ok(run.finish(good))
    }

    fn workers_for(&self, level: u64) -> AppResult<PositiveUsize> {
        let workers = match self.config.axis {
            SearchAxis::Concurrency => level,
            SearchAxis::Rate => level
                .saturating_mul(RATE_WORKERS_PER_LEVEL)
                .max(RATE_MIN_WORKERS),
        };
        let workers = usize::try_from(workers).unwrap_or(usize::MAX);
        PositiveUsize::try_from(workers).map_err(AppError::validation)
    }

    fn limiter_for(&self, level: u64) -> AppResult<Option<RateLimiter>> {
        let config = match self.config.axis {
            SearchAxis::Concurrency => self.config.rate,
            SearchAxis::Rate => {
                let mut config = self
                    .config
                    .rate
                    .unwrap_or_else(|| RateLimiterConfig::per_second(level));
                config.rate = level;
                Some(config)
            }
        };
        config
            .map(RateLimiter::new)
            .transpose()
            .map_err(AppError::validation)
    }

    fn executor_for(&self, level: u64) -> AppResult<ConcurrentExecutor> {
        let workers = self.workers_for(level)?;
        let mut config = ExecutorConfig::new(workers).with_grace_period(self.config.grace_period);
        if let Some(retry) = self.config.retry {
            config = config.with_retry(retry);
        }
        let mut executor = ConcurrentExecutor::new(config)
            .map_err(AppError::validation)?
            .with_level(level);
        if let Some(limiter) = self.limiter_for(level)? {
            executor = executor.with_limiter(Arc::new(limiter));
        }
        if let Some(shutdown_rx) = self.shutdown_rx.as_ref() {
            executor = executor.with_shutdown(shutdown_rx.clone());
        }
        Ok(executor)
    }

    fn stopping(&self) -> bool {
        self.shutdown_rx.as_ref().is_some_and(is_shutdown)
    }
}

struct SearchRun<'search> {
    search: &'search PerformanceSearch,
    factory: Arc<dyn TaskFactory>,
    aggregator: MetricsAggregator,
    verdicts: BTreeMap<u64, bool>,
    trials: Vec<Trial>,
    interrupted: bool,
}

impl SearchRun<'_> {
    /// Returns whether `level` passes, or `None` once the search has been
    /// interrupted. Levels are only ever tried once.
    async fn try_level(&mut self, level: u64) -> AppResult<Option<bool>> {
        if let Some(passed) = self.verdicts.get(&level) {
            return Ok(Some(*passed));
        }
        if self.search.stopping() || !self.cool_down().await {
            self.interrupted = true;
            return Ok(None);
        }

        let trial = self.run_trial(level).await?;
        let passed = trial.verdict.passed();
        self.trials.push(trial);
        if self.search.stopping() {
            warn!("Search interrupted during trial at level {}", level);
            self.interrupted = true;
            return Ok(None);
        }
        self.verdicts.insert(level, passed);
        Ok(Some(passed))
    }

    /// Waits out the cooldown before every trial but the first. Returns false
    /// when shutdown arrives first.
    async fn cool_down(&self) -> bool {
        let cooldown = self.search.config.cooldown;
        if self.trials.is_empty() || cooldown.is_zero() {
            return true;
        }
        debug!("Cooling down for {:?}", cooldown);
        match self.search.shutdown_rx.clone() {
            Some(mut shutdown_rx) => tokio::select! {
                () = sleep(cooldown) => true,
                () = wait_for_shutdown(&mut shutdown_rx) => false,
            },
            None => {
                sleep(cooldown).await;
                true
            }
        }
    }

    async fn run_trial(&mut self, level: u64) -> AppResult<Trial> {
        let config = &self.search.config;
        let executor = self.search.executor_for(level)?;
        let concurrency = executor.config().workers.get();
        let rate_limit = (config.axis == SearchAxis::Rate).then_some(level);

        self.aggregator.reset();
        let results = match config.trial {
            TrialPlan::Batch { tasks_per_worker } => {
                let workers = u64::try_from(concurrency).unwrap_or(u64::MAX);
                let count = tasks_per_worker.saturating_mul(workers);
                executor.submit(self.factory.as_ref(), count).await
            }
            TrialPlan::Duration(duration) => {
                executor.run_for(Arc::clone(&self.factory), duration).await
            }
        };
        self.aggregator.record_all(&results);
        self.aggregator.close();
        let summary = self.aggregator.summarize();
        let verdict = judge(&summary, &config.thresholds, rate_limit);

        info!(
            "Trial level={} workers={} verdict={:?} throughput={}/s p95={}us errors={}%",
            level,
            concurrency,
            verdict,
            format_x100(summary.throughput_x100),
            summary.p95_latency_us,
            format_x100(summary.error_rate_x100)
        );

        Ok(Trial {
            level,
            concurrency,
            rate_limit,
            total: summary.count,
            successes: summary.success_count,
            error_rate_x100: summary.error_rate_x100,
            throughput_x100: summary.throughput_x100,
            p50_latency_us: summary.p50_latency_us,
            p95_latency_us: summary.p95_latency_us,
            p99_latency_us: summary.p99_latency_us,
            mean_latency_us: summary.mean_latency_us,
            duration_ms: summary.duration_ms,
            verdict,
            by_label: summary.by_label,
        })
    }

    /// The optimum is the passing trial with the best throughput, ties going
    /// to the lower mean latency. `good` is the highest passing level.
    fn finish(self, good: u64) -> SearchOutcome {
        let best = best_passing(&self.trials)
            .map(|trial| (trial.throughput_x100, trial.level, trial.concurrency));
        let max_level = self.search.config.max_level;
        let outcome = SearchOutcome {
            max_throughput_x100: best.map_or(0, |(throughput, _, _)| throughput),
            optimal_level: best.map_or(0, |(_, level, _)| level),
            optimal_concurrency: best.map_or(0, |(_, _, concurrency)| concurrency),
            highest_passing_level: good,
            ceiling_reached: self.verdicts.get(&max_level).copied().unwrap_or(false),
            no_passing_level: best.is_none(),
            interrupted: self.interrupted,
            trials: self.trials,
        };
        info!(
            "Search finished after {} trials: optimal level {} at {}/s (highest passing {})",
            outcome.trials.len(),
            outcome.optimal_level,
            format_x100(outcome.max_throughput_x100),
            outcome.highest_passing_level
        );
        outcome
    }
}

fn best_passing(trials: &[Trial]) -> Option<&Trial> {
    trials
        .iter()
        .filter(|trial| trial.verdict.passed())
        .max_by(|left, right| {
            left.throughput_x100
                .cmp(&right.throughput_x100)
                .then_with(|| right.mean_latency_us.cmp(&left.mean_latency_us))
        })
}

fn judge(summary: &MetricsSummary, thresholds: &Thresholds, target_rate: Option<u64>) -> TrialVerdict {
    if !summary.has_data {
        return TrialVerdict::NoData;
    }
    let max_p95_us = u64::try_from(thresholds.max_p95_latency.as_micros()).unwrap_or(u64::MAX);
    let errors_exceeded =
        summary.success_count == 0 || summary.error_rate_x100 > thresholds.max_error_rate_x100;
    let latency_exceeded = summary.p95_latency_us > max_p95_us;
    match (errors_exceeded, latency_exceeded) {
        (true, true) => TrialVerdict::ErrorRateAndLatencyExceeded,
        (true, false) => TrialVerdict::ErrorRateExceeded,
        (false, true) => TrialVerdict::LatencyExceeded,
        (false, false) => {
            let below_target = target_rate.is_some_and(|target| {
                summary.throughput_x100 < target.saturating_mul(TARGET_RATE_PERCENT)
            });
            if below_target {
                TrialVerdict::BelowTargetRate
            } else {
                TrialVerdict::Pass
            }
        }
    }
}
