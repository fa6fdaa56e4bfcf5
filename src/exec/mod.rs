//! Bounded worker pool: shared queue, optional rate gate, deadline and
//! graceful cancellation, per-task retries.
mod executor;
mod retry;
mod task;

#[cfg(test)]
mod tests;

pub use executor::{ConcurrentExecutor, ExecutorConfig, ExecutorStats, ResultOrder};
pub use retry::RetryPolicy;
pub use task::{Task, TaskContext, TaskError, TaskFactory, TaskFn, TaskId, TaskOutput, TaskResult};
