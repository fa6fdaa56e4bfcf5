use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::correlation::{FailurePolicy, StoreIsolation, UnresolvedMode};
use crate::search::{RampKind, SearchAxis};

use super::parsers::{
    parse_duration_arg, parse_header, parse_percent_arg, parse_positive_u64, parse_positive_usize,
};
use super::types::{HttpMethod, OutputFormat, PositiveU64, PositiveUsize};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Rate-limited concurrent load generator that searches for the highest sustainable throughput and chains correlated API requests."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Find the highest level that stays within the error and latency thresholds
    Search(SearchArgs),
    /// Run a fixed load and print a metrics summary
    Run(RunArgs),
    /// Run the configured correlated scenario
    Chain(ChainArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct CommonArgs {
    /// Path to a TOML or JSON config file (defaults to ./tpsearch.toml or ./tpsearch.json)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Target URL for `search` and `run`
    #[arg(long, short = 'u', global = true)]
    pub url: Option<String>,

    /// HTTP headers in 'Key: Value' format (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header, global = true)]
    pub headers: Vec<(String, String)>,

    /// HTTP method to use
    #[arg(long, short = 'X', ignore_case = true, global = true)]
    pub method: Option<HttpMethod>,

    /// Request body; `${name}` placeholders are resolved per request
    #[arg(long, short = 'd', global = true)]
    pub data: Option<String>,

    /// Per-request timeout (supports ms/s/m/h)
    #[arg(long, value_parser = parse_duration_arg, global = true)]
    pub timeout: Option<Duration>,

    /// Status code a response must have to count as a success (default: any 2xx)
    #[arg(long = "expected-status", global = true)]
    pub expected_status: Option<u16>,

    /// What to do with placeholders that resolve to nothing
    #[arg(long = "unresolved", value_enum, global = true)]
    pub unresolved: Option<UnresolvedMode>,

    /// Output format for the final report
    #[arg(long, short = 'o', value_enum, global = true)]
    pub output: Option<OutputFormat>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct SearchArgs {
    /// Ramp strategy
    #[arg(long, value_enum)]
    pub strategy: Option<RampKind>,

    /// Whether levels are worker counts or target rates
    #[arg(long, value_enum)]
    pub axis: Option<SearchAxis>,

    /// First level to try
    #[arg(long, value_parser = parse_positive_u64)]
    pub initial: Option<PositiveU64>,

    /// Highest level to try
    #[arg(long, value_parser = parse_positive_u64)]
    pub max: Option<PositiveU64>,

    /// Increment for the linear strategy
    #[arg(long, value_parser = parse_positive_u64)]
    pub step: Option<PositiveU64>,

    /// Highest acceptable error rate (e.g. 5%, 0.5%)
    #[arg(long = "error-threshold", value_parser = parse_percent_arg)]
    pub error_threshold: Option<u64>,

    /// Highest acceptable p95 latency (supports ms/s/m/h)
    #[arg(long = "latency-threshold", value_parser = parse_duration_arg)]
    pub latency_threshold: Option<Duration>,

    /// Run each trial for a fixed time instead of a fixed batch
    #[arg(long = "trial-duration", value_parser = parse_duration_arg, conflicts_with = "trial_requests")]
    pub trial_duration: Option<Duration>,

    /// Requests per worker in each trial batch
    #[arg(long = "trial-requests", value_parser = parse_positive_u64)]
    pub trial_requests: Option<PositiveU64>,

    /// Rate cap for every trial (requests per second)
    #[arg(long, value_parser = parse_positive_u64)]
    pub rate: Option<PositiveU64>,

    /// Token bucket capacity used with --rate
    #[arg(long, value_parser = parse_positive_u64)]
    pub burst: Option<PositiveU64>,

    /// Pause between trials (supports ms/s/m/h)
    #[arg(long, value_parser = parse_duration_arg)]
    pub cooldown: Option<Duration>,

    /// Attempts per task, including the first
    #[arg(long, value_parser = parse_positive_u64)]
    pub attempts: Option<PositiveU64>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunArgs {
    /// Number of concurrent workers
    #[arg(long, short = 'c', value_parser = parse_positive_usize)]
    pub concurrency: Option<PositiveUsize>,

    /// Total number of requests
    #[arg(long, short = 'n', value_parser = parse_positive_u64, conflicts_with = "duration")]
    pub requests: Option<PositiveU64>,

    /// Keep starting requests for this long instead of a fixed count
    #[arg(long, short = 't', value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Requests per second
    #[arg(long, value_parser = parse_positive_u64)]
    pub rate: Option<PositiveU64>,

    /// Token bucket capacity used with --rate
    #[arg(long, value_parser = parse_positive_u64)]
    pub burst: Option<PositiveU64>,

    /// Hard stop for the whole run (supports ms/s/m/h)
    #[arg(long, value_parser = parse_duration_arg)]
    pub deadline: Option<Duration>,

    /// Attempts per task, including the first
    #[arg(long, value_parser = parse_positive_u64)]
    pub attempts: Option<PositiveU64>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ChainArgs {
    /// Number of chain iterations
    #[arg(long, short = 'i', value_parser = parse_positive_usize)]
    pub iterations: Option<PositiveUsize>,

    /// How parallel iterations share parameters
    #[arg(long, value_enum)]
    pub isolation: Option<StoreIsolation>,

    /// Whether a failed step stops the rest of the chain
    #[arg(long = "on-failure", value_enum)]
    pub on_failure: Option<FailurePolicy>,
}
