use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, warn};

use crate::args::PositiveUsize;
use crate::error::ValidationError;
use crate::rate::RateLimiter;
use crate::shutdown::{ShutdownReceiver, is_shutdown, shutdown_channel, wait_for_shutdown};

use super::retry::RetryPolicy;
use super::task::{Task, TaskContext, TaskError, TaskFactory, TaskId, TaskOutput, TaskResult};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrder {
    #[default]
    Completion,
    Submission,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub workers: PositiveUsize,
    /// Hard cutoff measured from the start of a run.
    pub deadline: Option<Duration>,
    /// How long in-flight tasks may keep running after shutdown or the end
    /// of a timed run.
    pub grace_period: Duration,
    pub order: ResultOrder,
    pub retry: Option<RetryPolicy>,
}

impl ExecutorConfig {
    #[must_use]
    pub const fn new(workers: PositiveUsize) -> Self {
        Self {
            workers,
            deadline: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            order: ResultOrder::Completion,
            retry: None,
        }
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub const fn with_order(mut self, order: ResultOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// # Errors
    ///
    /// Returns an error when the retry policy is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(retry) = self.retry.as_ref() {
            retry.validate()?;
        }
        Ok(())
    }
}

/// Running totals across every run of one executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub runs: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Tasks that needed more than one attempt.
    pub retried: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
}

impl ExecutorStats {
    fn record(&mut self, result: &TaskResult) {
        self.total = self.total.saturating_add(1);
        if result.attempts > 1 {
            self.retried = self.retried.saturating_add(1);
        }
        match result.error.as_ref() {
            None => self.succeeded = self.succeeded.saturating_add(1),
            Some(err) => {
                self.failed = self.failed.saturating_add(1);
                let count = self
                    .failures_by_kind
                    .entry(err.kind_label().to_owned())
                    .or_insert(0);
                *count = count.saturating_add(1);
            }
        }
    }
}

enum WorkSource {
    Queue(Mutex<VecDeque<(u64, Task)>>),
    Factory {
        factory: Arc<dyn TaskFactory>,
        next_index: AtomicU64,
    },
}

impl WorkSource {
    fn next(&self, level: u64, concurrency: usize) -> Option<(u64, Task)> {
        match self {
            Self::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front(),
            Self::Factory {
                factory,
                next_index,
            } => {
                let index = next_index.fetch_add(1, Ordering::Relaxed);
                let ctx = TaskContext {
                    index,
                    level,
                    concurrency,
                };
                Some((index, factory.make(ctx)))
            }
        }
    }

    fn drain(&self) -> Vec<(u64, Task)> {
        match self {
            Self::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect(),
            Self::Factory { .. } => Vec::new(),
        }
    }
}

struct RunShared {
    source: WorkSource,
    limiter: Option<Arc<RateLimiter>>,
    retry: Option<RetryPolicy>,
    /// No task starts at or after this instant.
    start_cutoff: Option<Instant>,
    /// In-flight tasks still running at this instant become `Timeout`.
    hard_deadline: Option<Instant>,
    grace_period: Duration,
    level: u64,
    concurrency: usize,
}

impl RunShared {
    fn past_cutoff(&self) -> bool {
        self.start_cutoff
            .is_some_and(|cutoff| Instant::now() >= cutoff)
    }
}

/// Worker pool pulling tasks from a shared queue, optionally gated by a
/// [`RateLimiter`]. Every submitted task yields exactly one [`TaskResult`].
pub struct ConcurrentExecutor {
    config: ExecutorConfig,
    level: Option<u64>,
    limiter: Option<Arc<RateLimiter>>,
    shutdown_rx: Option<ShutdownReceiver>,
    stats: Mutex<ExecutorStats>,
}

impl ConcurrentExecutor {
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid.
    pub fn new(config: ExecutorConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            config,
            level: None,
            limiter: None,
            shutdown_rx: None,
            stats: Mutex::new(ExecutorStats::default()),
        })
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown_rx: ShutdownReceiver) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Level reported to factories through [`TaskContext::level`]. Defaults
    /// to the worker count.
    #[must_use]
    pub const fn with_level(mut self, level: u64) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs every task and returns one result per task.
    pub async fn run(&self, tasks: Vec<Task>) -> Vec<TaskResult> {
        let submitted: Vec<(TaskId, Option<String>)> = tasks
            .iter()
            .map(|task| (task.id(), task.label().map(str::to_owned)))
            .collect();
        let queue: VecDeque<(u64, Task)> = (0_u64..).zip(tasks).collect();
        let started = Instant::now();
        let deadline = self
            .config
            .deadline
            .and_then(|limit| started.checked_add(limit));
        let shared = self.shared(WorkSource::Queue(Mutex::new(queue)), deadline, deadline);
        let mut results = self.drive(shared).await;

        // A worker that died mid-task leaves a hole; fill it so counts match.
        if results.len() < submitted.len() {
            let seen: BTreeSet<u64> = results.iter().map(|result| result.seq).collect();
            for (seq, (task_id, label)) in (0_u64..).zip(submitted) {
                if !seen.contains(&seq) {
                    results.push(
                        TaskResult::failed(
                            task_id,
                            seq,
                            Duration::ZERO,
                            TaskError::Panicked("worker exited before reporting".to_owned()),
                            0,
                        )
                        .labelled(label.as_deref()),
                    );
                }
            }
        }
        self.finish(results)
    }

    /// Builds `count` tasks from `factory` and runs them.
    pub async fn submit<F>(&self, factory: &F, count: u64) -> Vec<TaskResult>
    where
        F: TaskFactory + ?Sized,
    {
        let level = self.level();
        let concurrency = self.config.workers.get();
        let tasks = (0..count)
            .map(|index| {
                factory.make(TaskContext {
                    index,
                    level,
                    concurrency,
                })
            })
            .collect();
        self.run(tasks).await
    }

    /// Keeps pulling fresh tasks from `factory` until `duration` elapses.
    /// In-flight tasks then get the grace period before being abandoned as
    /// timed out.
    pub async fn run_for(&self, factory: Arc<dyn TaskFactory>, duration: Duration) -> Vec<TaskResult> {
        let started = Instant::now();
        let mut cutoff = started.checked_add(duration);
        if let Some(deadline) = self
            .config
            .deadline
            .and_then(|limit| started.checked_add(limit))
        {
            cutoff = Some(cutoff.map_or(deadline, |end| end.min(deadline)));
        }
        let hard_deadline = cutoff.and_then(|end| end.checked_add(self.config.grace_period));
        let source = WorkSource::Factory {
            factory,
            next_index: AtomicU64::new(0),
        };
        let shared = self.shared(source, cutoff, hard_deadline);
        let results = self.drive(shared).await;
        self.finish(results)
    }

    fn level(&self) -> u64 {
        self.level
            .unwrap_or_else(|| u64::try_from(self.config.workers.get()).unwrap_or(u64::MAX))
    }

    fn shared(
        &self,
        source: WorkSource,
        start_cutoff: Option<Instant>,
        hard_deadline: Option<Instant>,
    ) -> Arc<RunShared> {
        Arc::new(RunShared {
            source,
            limiter: self.limiter.clone(),
            retry: self.config.retry,
            start_cutoff,
            hard_deadline,
            grace_period: self.config.grace_period,
            level: self.level(),
            concurrency: self.config.workers.get(),
        })
    }

    fn shutdown_receiver(&self) -> ShutdownReceiver {
        // Without a caller-provided signal the sender is dropped at once and
        // `wait_for_shutdown` never resolves.
        self.shutdown_rx
            .clone()
            .unwrap_or_else(|| shutdown_channel().1)
    }

    async fn drive(&self, shared: Arc<RunShared>) -> Vec<TaskResult> {
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<TaskResult>();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers.get() {
            let shared = Arc::clone(&shared);
            let result_tx = result_tx.clone();
            let shutdown_rx = self.shutdown_receiver();
            workers.spawn(worker_loop(worker_id, shared, result_tx, shutdown_rx));
        }
        drop(result_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!("Executor worker failed: {}", err);
            }
        }

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        let leftover = shared.source.drain();
        if !leftover.is_empty() {
            let shutdown_rx = self.shutdown_receiver();
            let error = if is_shutdown(&shutdown_rx) {
                TaskError::Cancelled
            } else {
                TaskError::Timeout
            };
            debug!(
                "Recording {} queued tasks as {}",
                leftover.len(),
                error.kind_label()
            );
            for (seq, task) in leftover {
                results.push(
                    TaskResult::failed(task.id(), seq, Duration::ZERO, error.clone(), 0)
                        .labelled(task.label()),
                );
            }
        }
        results
    }

    fn finish(&self, mut results: Vec<TaskResult>) -> Vec<TaskResult> {
        if self.config.order == ResultOrder::Submission {
            results.sort_by_key(|result| result.seq);
        }
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.runs = stats.runs.saturating_add(1);
        for result in &results {
            stats.record(result);
        }
        debug!(
            "Executor run finished: {} results, {} failed overall",
            results.len(),
            stats.failed
        );
        results
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<RunShared>,
    result_tx: mpsc::UnboundedSender<TaskResult>,
    mut shutdown_rx: ShutdownReceiver,
) {
    loop {
        if is_shutdown(&shutdown_rx) || shared.past_cutoff() {
            break;
        }
        let Some((seq, task)) = shared.source.next(shared.level, shared.concurrency) else {
            break;
        };

        if let Some(limiter) = shared.limiter.as_ref() {
            let blocked = tokio::select! {
                () = limiter.acquire() => None,
                () = wait_for_shutdown(&mut shutdown_rx) => Some(TaskError::Cancelled),
                () = until(shared.start_cutoff) => Some(TaskError::Timeout),
            };
            if let Some(error) = blocked {
                // Open-ended runs simply stop; queued tasks must be reported.
                if matches!(shared.source, WorkSource::Queue(_)) {
                    let result = TaskResult::failed(task.id(), seq, Duration::ZERO, error, 0)
                        .labelled(task.label());
                    if result_tx.send(result).is_err() {
                        warn!("Worker {} could not report a blocked task", worker_id);
                    }
                }
                break;
            }
        }

        let result = run_task(&shared, seq, &task, &mut shutdown_rx)
            .await
            .labelled(task.label());
        if result_tx.send(result).is_err() {
            warn!("Worker {} lost its result channel", worker_id);
            break;
        }
    }
}

async fn run_task(
    shared: &RunShared,
    seq: u64,
    task: &Task,
    shutdown_rx: &mut ShutdownReceiver,
) -> TaskResult {
    let started = Instant::now();
    let max_attempts = shared.retry.map_or(1, |policy| policy.max_attempts);
    let mut attempt: u32 = 1;
    loop {
        match run_attempt(shared, task, shutdown_rx).await {
            Ok(payload) => {
                return TaskResult::succeeded(task.id(), seq, started.elapsed(), payload, attempt);
            }
            Err(TaskError::Failed(message)) if attempt < max_attempts => {
                let delay = shared
                    .retry
                    .map_or(Duration::ZERO, |policy| policy.delay_for(attempt));
                debug!(
                    "{} attempt {} failed ({}), retrying in {:?}",
                    task.id(),
                    attempt,
                    message,
                    delay
                );
                let interrupted = tokio::select! {
                    () = sleep(delay) => None,
                    () = wait_for_shutdown(shutdown_rx) => Some(TaskError::Cancelled),
                    () = until(shared.hard_deadline) => Some(TaskError::Timeout),
                };
                if let Some(error) = interrupted {
                    return TaskResult::failed(task.id(), seq, started.elapsed(), error, attempt);
                }
                attempt = attempt.saturating_add(1);
            }
            Err(error) => {
                return TaskResult::failed(task.id(), seq, started.elapsed(), error, attempt);
            }
        }
    }
}

/// Runs one attempt in its own tokio task so panics and stalls stay isolated.
async fn run_attempt(
    shared: &RunShared,
    task: &Task,
    shutdown_rx: &mut ShutdownReceiver,
) -> Result<serde_json::Value, TaskError> {
    let mut handle = tokio::spawn(task.invoke());
    let joined = tokio::select! {
        joined = &mut handle => joined,
        () = until(shared.hard_deadline) => {
            handle.abort();
            return Err(TaskError::Timeout);
        }
        () = wait_for_shutdown(shutdown_rx) => {
            tokio::select! {
                joined = &mut handle => joined,
                () = sleep(shared.grace_period) => {
                    handle.abort();
                    return Err(TaskError::Cancelled);
                }
                () = until(shared.hard_deadline) => {
                    handle.abort();
                    return Err(TaskError::Timeout);
                }
            }
        }
    };
    flatten_join(joined)
}

fn flatten_join(joined: Result<TaskOutput, JoinError>) -> Result<serde_json::Value, TaskError> {
    match joined {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(message)) => Err(TaskError::Failed(message)),
        Err(err) if err.is_panic() => {
            let panic = err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|text| (*text).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(TaskError::Panicked(message))
        }
        Err(_) => Err(TaskError::Cancelled),
    }
}

async fn until(instant: Option<Instant>) {
    match instant {
        Some(instant) => sleep_until(instant).await,
        None => std::future::pending::<()>().await,
    }
}
