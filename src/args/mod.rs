//! CLI argument types and parsing helpers.
mod cli;
mod defaults;
pub(crate) mod parsers;
mod types;


pub use cli::{ChainArgs, Cli, Command, CommonArgs, RunArgs, SearchArgs};
pub use parsers::{parse_duration, parse_percent_x100};
pub use types::{HttpMethod, OutputFormat, PositiveU64, PositiveUsize};

pub(crate) use defaults::{
    DEFAULT_CONFIG_FILES, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RUN_CONCURRENCY, DEFAULT_RUN_REQUESTS,
    DEFAULT_SEARCH_MAX, DEFAULT_USER_AGENT,
};
pub(crate) use parsers::parse_header;
