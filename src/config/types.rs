use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::args::{HttpMethod, OutputFormat, parse_duration, parse_percent_x100};
use crate::correlation::{ChainStep, FailurePolicy, StoreIsolation, UnresolvedMode};
use crate::error::ValidationError;
use crate::http::WeightedRequest;
use crate::rate::LimiterMode;
use crate::search::{RampKind, SearchAxis};

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub target: Option<TargetConfig>,
    pub search: Option<SearchSection>,
    pub run: Option<RunSection>,
    pub rate: Option<RateSection>,
    pub retry: Option<RetrySection>,
    pub scenario: Option<ScenarioConfig>,
    pub output: Option<OutputFormat>,
    pub unresolved: Option<UnresolvedMode>,
    /// Parameters seeded into the session store before anything runs.
    pub vars: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetConfig {
    pub url: Option<String>,
    pub base_url: Option<String>,
    pub method: Option<HttpMethod>,
    /// `Key: Value` entries.
    pub headers: Option<Vec<String>>,
    pub body: Option<Value>,
    /// Weighted request templates; replaces `url` for mixed workloads.
    pub requests: Option<Vec<WeightedRequest>>,
    pub expected_status: Option<u16>,
    pub timeout: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchSection {
    pub strategy: Option<RampKind>,
    pub axis: Option<SearchAxis>,
    pub initial: Option<u64>,
    pub max: Option<u64>,
    pub step: Option<u64>,
    pub error_threshold: Option<PercentValue>,
    pub latency_threshold: Option<DurationValue>,
    pub trial_duration: Option<DurationValue>,
    pub trial_requests: Option<u64>,
    pub cooldown: Option<DurationValue>,
    pub grace_period: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunSection {
    #[serde(alias = "workers")]
    pub concurrency: Option<usize>,
    pub requests: Option<u64>,
    pub duration: Option<DurationValue>,
    pub deadline: Option<DurationValue>,
    pub grace_period: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RateSection {
    pub rate: Option<u64>,
    pub per: Option<DurationValue>,
    pub burst: Option<u64>,
    pub mode: Option<LimiterMode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrySection {
    pub attempts: Option<u32>,
    pub backoff: Option<DurationValue>,
    pub multiplier: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScenarioConfig {
    pub base_url: Option<String>,
    pub headers: Option<Vec<String>>,
    pub steps: Vec<ChainStep>,
    pub iterations: Option<usize>,
    pub isolation: Option<StoreIsolation>,
    pub on_failure: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(0) => Err(ValidationError::DurationZero),
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

/// `5` and `"5%"` both mean five percent.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PercentValue {
    Whole(u64),
    Text(String),
}

impl PercentValue {
    pub(crate) fn to_x100(&self) -> Result<u64, ValidationError> {
        match self {
            PercentValue::Whole(value) if *value <= 100 => Ok(value.saturating_mul(100)),
            PercentValue::Whole(value) => Err(ValidationError::PercentOutOfRange {
                value: value.to_string(),
            }),
            PercentValue::Text(text) => parse_percent_x100(text),
        }
    }
}
