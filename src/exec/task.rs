use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

pub type TaskOutput = Result<Value, String>;
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskOutput> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A unit of work. The operation can be invoked more than once, which is
/// what retries rely on.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    op: TaskFn,
    label: Option<Arc<str>>,
}

impl Task {
    pub fn new<F, Fut>(id: TaskId, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutput> + Send + 'static,
    {
        let op: TaskFn = Arc::new(move || op().boxed());
        Self {
            id,
            op,
            label: None,
        }
    }

    /// Groups the task's result under `label` in metrics breakdowns.
    #[must_use]
    pub fn with_label(mut self, label: Arc<str>) -> Self {
        self.label = Some(label);
        self
    }

    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(super) fn invoke(&self) -> BoxFuture<'static, TaskOutput> {
        (self.op)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Handed to a [`TaskFactory`] for every task it builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// Submission index within the current run.
    pub index: u64,
    /// Search level the run belongs to (worker count or target rate).
    pub level: u64,
    pub concurrency: usize,
}

pub trait TaskFactory: Send + Sync {
    fn make(&self, ctx: TaskContext) -> Task;
}

impl<F> TaskFactory for F
where
    F: Fn(TaskContext) -> Task + Send + Sync,
{
    fn make(&self, ctx: TaskContext) -> Task {
        self(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error("Task timed out.")]
    Timeout,
    #[error("Task cancelled.")]
    Cancelled,
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Panicked(_) => "panicked",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    /// Position in submission order.
    pub seq: u64,
    pub success: bool,
    pub latency: Duration,
    pub error: Option<TaskError>,
    pub payload: Option<Value>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TaskResult {
    pub(super) const fn succeeded(
        task_id: TaskId,
        seq: u64,
        latency: Duration,
        payload: Value,
        attempts: u32,
    ) -> Self {
        Self {
            task_id,
            seq,
            success: true,
            latency,
            error: None,
            payload: Some(payload),
            attempts,
            label: None,
        }
    }

    pub(super) const fn failed(
        task_id: TaskId,
        seq: u64,
        latency: Duration,
        error: TaskError,
        attempts: u32,
    ) -> Self {
        Self {
            task_id,
            seq,
            success: false,
            latency,
            error: Some(error),
            payload: None,
            attempts,
            label: None,
        }
    }

    pub(super) fn labelled(mut self, label: Option<&str>) -> Self {
        self.label = label.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn latency_us(&self) -> u64 {
        u64::try_from(self.latency.as_micros()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }
}
