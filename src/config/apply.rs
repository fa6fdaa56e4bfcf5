use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::args::{
    ChainArgs, CommonArgs, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RUN_CONCURRENCY, DEFAULT_RUN_REQUESTS,
    DEFAULT_SEARCH_MAX, OutputFormat, PositiveU64, PositiveUsize, RunArgs, SearchArgs,
    parse_header,
};
use crate::correlation::{ChainStep, FailurePolicy, StoreIsolation, UnresolvedMode};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};
use crate::exec::{ExecutorConfig, RetryPolicy};
use crate::http::{HttpClientConfig, RequestMix};
use crate::rate::RateLimiterConfig;
use crate::search::{RampKind, RampStrategy, SearchConfig, Thresholds, TrialPlan};

use super::types::{ConfigFile, DurationValue, PercentValue, RateSection, RetrySection};

/// What `search` and `run` send: a weighted mix of request templates (a
/// single URL is a one-entry mix), or a whole scenario per task.
#[derive(Debug, Clone)]
pub enum Workload {
    Requests(RequestMix),
    Scenario(Vec<ChainStep>),
}

/// Settings shared by every subcommand once CLI flags and config are merged.
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub client: HttpClientConfig,
    pub workload: Option<Workload>,
    pub expected_status: Option<u16>,
    pub unresolved: UnresolvedMode,
    pub vars: BTreeMap<String, Value>,
    pub output: OutputFormat,
}

impl TargetSettings {
    /// # Errors
    ///
    /// Returns `MissingTarget` when neither a URL nor a scenario is set.
    pub fn workload(&self) -> AppResult<&Workload> {
        self.workload
            .as_ref()
            .ok_or_else(|| AppError::validation(ValidationError::MissingTarget))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLoad {
    Requests(u64),
    Duration(Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub executor: ExecutorConfig,
    pub rate: Option<RateLimiterConfig>,
    pub load: RunLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSettings {
    pub iterations: PositiveUsize,
    pub isolation: StoreIsolation,
    pub on_failure: FailurePolicy,
}

/// Merges the global flags with the `target`, `scenario` and top-level
/// sections. Flags win over config values.
///
/// # Errors
///
/// Returns an error for malformed headers, durations or URLs.
pub fn resolve_target(common: &CommonArgs, config: Option<&ConfigFile>) -> AppResult<TargetSettings> {
    let target = config.and_then(|config| config.target.as_ref());
    let scenario = config.and_then(|config| config.scenario.as_ref());

    let mut headers = Vec::new();
    let config_headers = target
        .and_then(|target| target.headers.as_ref())
        .into_iter()
        .chain(scenario.and_then(|scenario| scenario.headers.as_ref()))
        .flatten();
    for raw in config_headers {
        let header = parse_header(raw)
            .map_err(|err| AppError::config(ConfigError::InvalidHeader { source: err }))?;
        merge_header(&mut headers, header);
    }
    for header in &common.headers {
        merge_header(&mut headers, header.clone());
    }

    let timeout = match common.timeout {
        Some(timeout) => timeout,
        None => duration_field(
            target.and_then(|target| target.timeout.as_ref()),
            "target.timeout",
        )?
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
    };
    let mut client = HttpClientConfig::default()
        .with_timeout(timeout)
        .with_headers(headers);
    let base_url = target
        .and_then(|target| target.base_url.as_deref())
        .or_else(|| scenario.and_then(|scenario| scenario.base_url.as_deref()));
    if let Some(base_url) = base_url {
        client = client.with_base_url(base_url)?;
    }

    let requests = target.and_then(|target| target.requests.clone());
    if common.url.is_none()
        && requests.is_some()
        && target.is_some_and(|target| target.url.is_some())
    {
        return Err(AppError::config(ConfigError::Conflict {
            left: "target.url",
            right: "target.requests",
        }));
    }
    let url = common
        .url
        .clone()
        .or_else(|| target.and_then(|target| target.url.clone()));
    let workload = match (url, requests, scenario) {
        (Some(url), _, _) => {
            let method = common
                .method
                .or_else(|| target.and_then(|target| target.method))
                .unwrap_or_default();
            let body = common
                .data
                .clone()
                .map(Value::String)
                .or_else(|| target.and_then(|target| target.body.clone()));
            let mut request = Map::new();
            request.insert("method".to_owned(), Value::from(method.as_str()));
            request.insert("url".to_owned(), Value::String(url));
            if let Some(body) = body {
                request.insert("body".to_owned(), body);
            }
            Some(Workload::Requests(RequestMix::single(Value::Object(request))))
        }
        (None, Some(requests), _) => Some(Workload::Requests(
            RequestMix::new(requests).map_err(AppError::validation)?,
        )),
        (None, None, Some(scenario)) if scenario.steps.is_empty() => {
            return Err(AppError::validation(ValidationError::ScenarioMissingSteps));
        }
        (None, None, Some(scenario)) => Some(Workload::Scenario(scenario.steps.clone())),
        (None, None, None) => None,
    };

    Ok(TargetSettings {
        client,
        workload,
        expected_status: common
            .expected_status
            .or_else(|| target.and_then(|target| target.expected_status)),
        unresolved: common
            .unresolved
            .or_else(|| config.and_then(|config| config.unresolved))
            .unwrap_or_default(),
        vars: config
            .and_then(|config| config.vars.clone())
            .unwrap_or_default(),
        output: common
            .output
            .or_else(|| config.and_then(|config| config.output))
            .unwrap_or_default(),
    })
}

/// # Errors
///
/// Returns an error for an invalid config value or conflicting trial
/// settings. Level checks happen in [`SearchConfig::validate`].
pub fn resolve_search(args: &SearchArgs, config: Option<&ConfigFile>) -> AppResult<SearchConfig> {
    let section = config.and_then(|config| config.search.as_ref());

    let max_level = args
        .max
        .map(PositiveU64::get)
        .or_else(|| section.and_then(|section| section.max))
        .unwrap_or(DEFAULT_SEARCH_MAX);
    let mut search = SearchConfig::new(max_level);

    if let Some(initial) = args
        .initial
        .map(PositiveU64::get)
        .or_else(|| section.and_then(|section| section.initial))
    {
        search.initial_level = initial;
    }
    if let Some(axis) = args.axis.or_else(|| section.and_then(|section| section.axis)) {
        search.axis = axis;
    }
    let kind = args
        .strategy
        .or_else(|| section.and_then(|section| section.strategy))
        .unwrap_or(RampKind::Exponential);
    let step = args
        .step
        .map(PositiveU64::get)
        .or_else(|| section.and_then(|section| section.step))
        .unwrap_or(1);
    search.strategy = RampStrategy::new(kind, step);

    search.thresholds = Thresholds {
        max_error_rate_x100: match args.error_threshold {
            Some(value) => value,
            None => match section.and_then(|section| section.error_threshold.as_ref()) {
                Some(value) => percent_field(value, "search.error_threshold")?,
                None => search.thresholds.max_error_rate_x100,
            },
        },
        max_p95_latency: match args.latency_threshold {
            Some(value) => value,
            None => duration_field(
                section.and_then(|section| section.latency_threshold.as_ref()),
                "search.latency_threshold",
            )?
            .unwrap_or(search.thresholds.max_p95_latency),
        },
    };

    search.trial = match (args.trial_duration, args.trial_requests) {
        (Some(duration), _) => TrialPlan::Duration(duration),
        (None, Some(requests)) => TrialPlan::Batch {
            tasks_per_worker: requests.get(),
        },
        (None, None) => {
            let duration = duration_field(
                section.and_then(|section| section.trial_duration.as_ref()),
                "search.trial_duration",
            )?;
            let requests = section.and_then(|section| section.trial_requests);
            match (duration, requests) {
                (Some(_), Some(_)) => {
                    return Err(AppError::config(ConfigError::Conflict {
                        left: "search.trial_duration",
                        right: "search.trial_requests",
                    }));
                }
                (Some(duration), None) => TrialPlan::Duration(duration),
                (None, Some(requests)) => TrialPlan::Batch {
                    tasks_per_worker: requests,
                },
                (None, None) => search.trial,
            }
        }
    };

    search.rate = rate_config(
        args.rate,
        args.burst,
        config.and_then(|config| config.rate.as_ref()),
    )?;
    if let Some(cooldown) = match args.cooldown {
        Some(cooldown) => Some(cooldown),
        None => duration_field(
            section.and_then(|section| section.cooldown.as_ref()),
            "search.cooldown",
        )?,
    } {
        search.cooldown = cooldown;
    }
    if let Some(grace) = duration_field(
        section.and_then(|section| section.grace_period.as_ref()),
        "search.grace_period",
    )? {
        search.grace_period = grace;
    }
    search.retry = retry_policy(
        args.attempts,
        config.and_then(|config| config.retry.as_ref()),
    )?;
    Ok(search)
}

/// # Errors
///
/// Returns an error for an invalid config value.
pub fn resolve_run(args: &RunArgs, config: Option<&ConfigFile>) -> AppResult<RunSettings> {
    let section = config.and_then(|config| config.run.as_ref());

    let workers = match args.concurrency {
        Some(workers) => workers,
        None => {
            let workers = section
                .and_then(|section| section.concurrency)
                .unwrap_or(DEFAULT_RUN_CONCURRENCY);
            PositiveUsize::try_from(workers).map_err(|err| {
                AppError::config(ConfigError::InvalidField {
                    field: "run.concurrency",
                    source: err,
                })
            })?
        }
    };
    let mut executor = ExecutorConfig::new(workers);
    let deadline = match args.deadline {
        Some(deadline) => Some(deadline),
        None => duration_field(
            section.and_then(|section| section.deadline.as_ref()),
            "run.deadline",
        )?,
    };
    if let Some(deadline) = deadline {
        executor = executor.with_deadline(deadline);
    }
    if let Some(grace) = duration_field(
        section.and_then(|section| section.grace_period.as_ref()),
        "run.grace_period",
    )? {
        executor = executor.with_grace_period(grace);
    }
    if let Some(retry) = retry_policy(
        args.attempts,
        config.and_then(|config| config.retry.as_ref()),
    )? {
        executor = executor.with_retry(retry);
    }

    let load = match (args.requests, args.duration) {
        (Some(requests), _) => RunLoad::Requests(requests.get()),
        (None, Some(duration)) => RunLoad::Duration(duration),
        (None, None) => {
            let duration = duration_field(
                section.and_then(|section| section.duration.as_ref()),
                "run.duration",
            )?;
            match (section.and_then(|section| section.requests), duration) {
                (Some(_), Some(_)) => {
                    return Err(AppError::config(ConfigError::Conflict {
                        left: "run.requests",
                        right: "run.duration",
                    }));
                }
                (Some(0), None) => {
                    return Err(AppError::config(ConfigError::InvalidField {
                        field: "run.requests",
                        source: ValidationError::ValueTooSmall { min: 1 },
                    }));
                }
                (Some(requests), None) => RunLoad::Requests(requests),
                (None, Some(duration)) => RunLoad::Duration(duration),
                (None, None) => RunLoad::Requests(DEFAULT_RUN_REQUESTS),
            }
        }
    };

    let rate = rate_config(
        args.rate,
        args.burst,
        config.and_then(|config| config.rate.as_ref()),
    )?;
    executor.validate().map_err(AppError::validation)?;
    Ok(RunSettings {
        executor,
        rate,
        load,
    })
}

/// # Errors
///
/// Returns an error when no scenario is configured or the iteration count
/// is zero.
pub fn resolve_chain(args: &ChainArgs, config: Option<&ConfigFile>) -> AppResult<ChainSettings> {
    let scenario = config
        .and_then(|config| config.scenario.as_ref())
        .ok_or_else(|| AppError::validation(ValidationError::ScenarioMissingSteps))?;
    let iterations = match args.iterations {
        Some(iterations) => iterations,
        None => PositiveUsize::try_from(scenario.iterations.unwrap_or(1)).map_err(|err| {
            AppError::config(ConfigError::InvalidField {
                field: "scenario.iterations",
                source: err,
            })
        })?,
    };
    Ok(ChainSettings {
        iterations,
        isolation: args.isolation.or(scenario.isolation).unwrap_or_default(),
        on_failure: args.on_failure.or(scenario.on_failure).unwrap_or_default(),
    })
}

fn rate_config(
    rate: Option<PositiveU64>,
    burst: Option<PositiveU64>,
    section: Option<&RateSection>,
) -> AppResult<Option<RateLimiterConfig>> {
    let Some(rate) = rate
        .map(PositiveU64::get)
        .or_else(|| section.and_then(|section| section.rate))
    else {
        return Ok(None);
    };
    let mut config = RateLimiterConfig::per_second(rate);
    if let Some(burst) = burst
        .map(PositiveU64::get)
        .or_else(|| section.and_then(|section| section.burst))
    {
        config = config.with_burst(burst);
    }
    if let Some(per) = duration_field(section.and_then(|section| section.per.as_ref()), "rate.per")? {
        config = config.with_period(per);
    }
    if let Some(mode) = section.and_then(|section| section.mode) {
        config = config.with_mode(mode);
    }
    config.validate().map_err(|err| {
        AppError::config(ConfigError::InvalidField {
            field: "rate",
            source: err,
        })
    })?;
    Ok(Some(config))
}

fn retry_policy(
    attempts: Option<PositiveU64>,
    section: Option<&RetrySection>,
) -> AppResult<Option<RetryPolicy>> {
    let attempts = match attempts {
        Some(attempts) => Some(u32::try_from(attempts.get()).unwrap_or(u32::MAX)),
        None => section.and_then(|section| section.attempts),
    };
    let Some(attempts) = attempts else {
        return Ok(None);
    };
    let backoff = duration_field(
        section.and_then(|section| section.backoff.as_ref()),
        "retry.backoff",
    )?
    .unwrap_or(Duration::from_millis(100));
    let mut policy = RetryPolicy::new(attempts, backoff);
    if let Some(multiplier) = section.and_then(|section| section.multiplier) {
        policy = policy.with_multiplier(multiplier);
    }
    policy.validate().map_err(|err| {
        AppError::config(ConfigError::InvalidField {
            field: "retry",
            source: err,
        })
    })?;
    Ok(Some(policy))
}

fn duration_field(
    value: Option<&DurationValue>,
    field: &'static str,
) -> AppResult<Option<Duration>> {
    value
        .map(DurationValue::to_duration)
        .transpose()
        .map_err(|err| AppError::config(ConfigError::InvalidField { field, source: err }))
}

fn percent_field(value: &PercentValue, field: &'static str) -> AppResult<u64> {
    value
        .to_x100()
        .map_err(|err| AppError::config(ConfigError::InvalidField { field, source: err }))
}

/// Later headers replace earlier ones with the same name.
fn merge_header(headers: &mut Vec<(String, String)>, header: (String, String)) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&header.0));
    headers.push(header);
}
