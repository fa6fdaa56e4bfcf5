use thiserror::Error;

use super::{ConfigError, CorrelationError, ExecError, HttpError, ValidationError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),
    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

pub type AppResult<T> = Result<T, AppError>;

/// Coarse classification of failures surfaced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Cancelled,
    InvalidConfig,
    UnresolvedParameter,
    ExtractionFailed,
    KeyNotFound,
    AssertionFailed,
    Other,
}

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn exec<E>(error: E) -> Self
    where
        E: Into<ExecError>,
    {
        error.into().into()
    }

    pub fn correlation<E>(error: E) -> Self
    where
        E: Into<CorrelationError>,
    {
        error.into().into()
    }

    pub fn http<E>(error: E) -> Self
    where
        E: Into<HttpError>,
    {
        error.into().into()
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::Config(_) | AppError::Clap { .. } => {
                ErrorKind::InvalidConfig
            }
            AppError::Exec(ExecError::Timeout { .. }) => ErrorKind::Timeout,
            AppError::Exec(ExecError::Cancelled) => ErrorKind::Cancelled,
            AppError::Correlation(error) => error.kind(),
            AppError::Exec(ExecError::ChainFailed { .. })
            | AppError::Io { .. }
            | AppError::Json { .. }
            | AppError::Http(_) => ErrorKind::Other,
        }
    }
}
