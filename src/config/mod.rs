//! Configuration loading and merging with CLI flags.
mod apply;
mod loader;
pub mod types;


pub use apply::{
    ChainSettings, RunLoad, RunSettings, TargetSettings, Workload, resolve_chain, resolve_run,
    resolve_search, resolve_target,
};
pub use loader::{load_config, load_config_file};
pub use types::ConfigFile;
