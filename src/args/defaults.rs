use std::time::Duration;

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("tpsearch/", env!("CARGO_PKG_VERSION"));

/// Config files picked up from the working directory when `--config` is absent.
pub(crate) const DEFAULT_CONFIG_FILES: [&str; 2] = ["tpsearch.toml", "tpsearch.json"];

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_RUN_CONCURRENCY: usize = 10;
pub(crate) const DEFAULT_RUN_REQUESTS: u64 = 100;
pub(crate) const DEFAULT_SEARCH_MAX: u64 = 64;
