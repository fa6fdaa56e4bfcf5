use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::CorrelationError;
use crate::exec::{Task, TaskContext, TaskFactory, TaskId};
use crate::params::ParameterStore;

use super::assertion::{Assertion, CompiledAssertions};
use super::engine::{CorrelationEngine, UnresolvedMode};
use super::extract::{CompiledRules, ExtractionRule, ResponseData};

/// Sends one resolved request template and returns what came back.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    /// # Errors
    ///
    /// Returns a message when the request could not be built or sent.
    async fn dispatch(&self, request: &Value) -> Result<ResponseData, String>;
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChainStep {
    pub name: String,
    /// Request template; `${name}` placeholders are resolved before dispatch.
    pub request: Value,
    #[serde(default)]
    pub extract: Vec<ExtractionRule>,
    #[serde(default)]
    pub expect_status: Option<u16>,
    /// Checked after extraction; the first failing assertion fails the step.
    #[serde(default, rename = "assert")]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Skip every step after the first failure.
    #[default]
    Stop,
    Continue,
}

/// How parallel iterations of a chain share parameters.
#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StoreIsolation {
    /// Every iteration works on its own copy of the session parameters.
    #[default]
    PerIteration,
    /// All iterations share one store and advance step by step together.
    SharedWithBarrier,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    /// Parameters written by this step.
    pub extracted: Vec<String>,
    pub error: Option<String>,
}

impl StepReport {
    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: StepStatus::Skipped,
            http_status: None,
            latency_ms: 0,
            extracted: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChainReport {
    pub success: bool,
    pub steps: Vec<StepReport>,
    /// Parameters visible to this iteration once it finished.
    pub parameters: BTreeMap<String, Value>,
}

impl ChainReport {
    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.steps.iter().find_map(|step| step.error.as_deref())
    }
}

#[derive(Debug)]
struct PreparedStep {
    step: ChainStep,
    rules: CompiledRules,
    assertions: CompiledAssertions,
}

/// Ordered steps where each step's extraction finishes before the next
/// step's placeholders are resolved.
pub struct StepChain {
    steps: Vec<PreparedStep>,
    dispatcher: Arc<dyn StepDispatcher>,
    policy: FailurePolicy,
    mode: UnresolvedMode,
}

impl StepChain {
    /// # Errors
    ///
    /// Returns an error when an extraction rule or assertion does not
    /// compile.
    pub fn new(
        steps: Vec<ChainStep>,
        dispatcher: Arc<dyn StepDispatcher>,
    ) -> Result<Self, CorrelationError> {
        let steps = steps
            .into_iter()
            .map(|step| {
                let rules = CompiledRules::compile(&step.extract)?;
                let assertions = CompiledAssertions::compile(&step.assertions)?;
                Ok(PreparedStep {
                    step,
                    rules,
                    assertions,
                })
            })
            .collect::<Result<Vec<_>, CorrelationError>>()?;
        Ok(Self {
            steps,
            dispatcher,
            policy: FailurePolicy::Stop,
            mode: UnresolvedMode::Fail,
        })
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_unresolved_mode(mut self, mode: UnresolvedMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step once, in order, against `store`.
    pub async fn run(&self, store: Arc<ParameterStore>) -> ChainReport {
        self.run_with(store, None).await
    }

    /// Runs `iterations` copies of the chain concurrently. Reports come back
    /// in iteration order.
    pub async fn run_parallel(
        self: &Arc<Self>,
        store: Arc<ParameterStore>,
        iterations: usize,
        isolation: StoreIsolation,
    ) -> Vec<ChainReport> {
        let barrier = match isolation {
            StoreIsolation::PerIteration => None,
            StoreIsolation::SharedWithBarrier => Some(Arc::new(Barrier::new(iterations.max(1)))),
        };
        let seed = store.get_all();
        let mut set = JoinSet::new();
        for iteration in 0..iterations {
            let chain = Arc::clone(self);
            let barrier = barrier.clone();
            let iteration_store = match isolation {
                StoreIsolation::PerIteration => Arc::new(ParameterStore::seeded(seed.clone())),
                StoreIsolation::SharedWithBarrier => Arc::clone(&store),
            };
            set.spawn(async move {
                let report = chain.run_with(iteration_store, barrier.as_deref()).await;
                (iteration, report)
            });
        }

        let mut reports: Vec<(usize, ChainReport)> = Vec::with_capacity(iterations);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => reports.push(entry),
                Err(err) => error!("Chain iteration failed to complete: {}", err),
            }
        }
        reports.sort_by_key(|(iteration, _)| *iteration);
        let mut reports = reports.into_iter().peekable();
        (0..iterations)
            .map(|iteration| {
                reports
                    .next_if(|(done, _)| *done == iteration)
                    .map_or_else(|| self.aborted_report(), |(_, report)| report)
            })
            .collect()
    }

    /// Adapts the chain to the executor: one task is one full iteration on a
    /// private store seeded with `seed`.
    #[must_use]
    pub fn task_factory(self: Arc<Self>, seed: BTreeMap<String, Value>) -> ChainTaskFactory {
        ChainTaskFactory { chain: self, seed }
    }

    /// Stands in for an iteration whose task died before reporting.
    fn aborted_report(&self) -> ChainReport {
        let mut steps: Vec<StepReport> = self
            .steps
            .iter()
            .map(|prepared| StepReport::skipped(&prepared.step.name))
            .collect();
        if let Some(first) = steps.first_mut() {
            first.status = StepStatus::Failed;
            first.error = Some("iteration aborted before reporting".to_owned());
        }
        ChainReport {
            success: false,
            steps,
            parameters: BTreeMap::new(),
        }
    }

    async fn run_with(&self, store: Arc<ParameterStore>, barrier: Option<&Barrier>) -> ChainReport {
        let engine = CorrelationEngine::new(Arc::clone(&store)).with_mode(self.mode);
        let mut reports = Vec::with_capacity(self.steps.len());
        let mut halted = false;

        for prepared in &self.steps {
            let report = if halted {
                StepReport::skipped(&prepared.step.name)
            } else {
                self.run_step(&engine, prepared).await
            };
            if report.status == StepStatus::Failed && self.policy == FailurePolicy::Stop {
                halted = true;
            }
            reports.push(report);
            // Every iteration waits once per step, skipped or not, so the
            // barrier generations stay aligned.
            if let Some(barrier) = barrier {
                barrier.wait().await;
            }
        }

        let success = reports
            .iter()
            .all(|report| report.status == StepStatus::Passed);
        ChainReport {
            success,
            steps: reports,
            parameters: store.get_all(),
        }
    }

    async fn run_step(&self, engine: &CorrelationEngine, prepared: &PreparedStep) -> StepReport {
        let step = &prepared.step;
        let started = Instant::now();
        let mut report = StepReport {
            name: step.name.clone(),
            status: StepStatus::Failed,
            http_status: None,
            latency_ms: 0,
            extracted: Vec::new(),
            error: None,
        };

        let request = match engine.resolve(&step.request) {
            Ok(request) => request,
            Err(err) => {
                warn!("Step '{}' could not be resolved: {}", step.name, err);
                report.error = Some(err.to_string());
                return report;
            }
        };

        let response = self.dispatch_isolated(request).await;
        report.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!("Step '{}' dispatch failed: {}", step.name, err);
                report.error = Some(err);
                return report;
            }
        };
        report.http_status = Some(response.status);

        if let Some(expected) = step.expect_status
            && response.status != expected
        {
            report.error = Some(format!(
                "Unexpected status {} (expected {}).",
                response.status, expected
            ));
            return report;
        }

        let checked = engine
            .extract_compiled(&response, &prepared.rules)
            .and_then(|extracted| {
                debug!("Step '{}' extracted {:?}", step.name, extracted);
                report.extracted = extracted;
                prepared.assertions.check(&response)
            });
        match checked {
            Ok(()) => report.status = StepStatus::Passed,
            Err(err) => {
                warn!("Step '{}' failed: {}", step.name, err);
                report.error = Some(err.to_string());
            }
        }
        info!(
            "Step '{}' finished: {:?} in {}ms",
            step.name, report.status, report.latency_ms
        );
        report
    }

    /// Dispatches in a separate tokio task so a panicking dispatcher fails
    /// the step instead of the whole iteration.
    async fn dispatch_isolated(&self, request: Value) -> Result<ResponseData, String> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = tokio::spawn(async move { dispatcher.dispatch(&request).await });
        match handle.await {
            Ok(response) => response,
            Err(err) if err.is_panic() => {
                let panic = err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|text| (*text).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(format!("Dispatcher panicked: {}", message))
            }
            Err(err) => Err(format!("Dispatch task failed: {}", err)),
        }
    }
}

pub struct ChainTaskFactory {
    chain: Arc<StepChain>,
    seed: BTreeMap<String, Value>,
}

impl TaskFactory for ChainTaskFactory {
    fn make(&self, ctx: TaskContext) -> Task {
        let chain = Arc::clone(&self.chain);
        let seed = self.seed.clone();
        Task::new(TaskId(ctx.index), move || {
            let chain = Arc::clone(&chain);
            let store = Arc::new(ParameterStore::seeded(seed.clone()));
            async move {
                let report = chain.run(store).await;
                if report.success {
                    serde_json::to_value(&report.parameters).map_err(|err| err.to_string())
                } else {
                    Err(report
                        .first_error()
                        .unwrap_or("chain step failed")
                        .to_owned())
                }
            }
        })
    }
}
