mod app;
mod config;
mod correlation;
mod exec;
mod http;
mod validation;

pub use app::{AppError, AppResult, ErrorKind};
pub use config::ConfigError;
pub use correlation::CorrelationError;
pub use exec::ExecError;
pub use http::HttpError;
pub use validation::ValidationError;
