mod args;
mod config;
mod correlation;
mod entry;
mod error;
mod exec;
mod http;
mod metrics;
mod params;
mod rate;
mod search;
mod shutdown;
mod system;

use error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
