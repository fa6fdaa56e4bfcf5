use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Timed out after {}ms waiting for {context}.", elapsed.as_millis())]
    Timeout {
        context: &'static str,
        elapsed: Duration,
    },
    #[error("Run was cancelled.")]
    Cancelled,
    #[error("{failed} of {total} chain iterations failed.")]
    ChainFailed { failed: usize, total: usize },
}
