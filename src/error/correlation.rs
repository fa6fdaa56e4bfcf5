use thiserror::Error;

use super::ErrorKind;

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("Unresolved parameter '${{{name}}}'.")]
    UnresolvedParameter { name: String },
    #[error("Required extraction '{target}' found no match for {source_expr}.")]
    ExtractionFailed { target: String, source_expr: String },
    #[error("Parameter '{name}' not found.")]
    KeyNotFound { name: String },
    #[error("Invalid regex '{pattern}' for '{target}': {source}")]
    InvalidRegex {
        target: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid JSONPath '{path}' for '{target}'.")]
    InvalidJsonPath { target: String, path: String },
    #[error("Assertion '{assertion}' failed: {detail}.")]
    AssertionFailed { assertion: String, detail: String },
    #[error("Invalid assertion '{assertion}': {reason}")]
    InvalidAssertion { assertion: String, reason: String },
    #[error("Built-in '{name}' rejected its arguments: {reason}")]
    InvalidBuiltinArgs { name: String, reason: String },
}

impl CorrelationError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            CorrelationError::UnresolvedParameter { .. } => ErrorKind::UnresolvedParameter,
            CorrelationError::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            CorrelationError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            CorrelationError::AssertionFailed { .. } => ErrorKind::AssertionFailed,
            CorrelationError::InvalidRegex { .. }
            | CorrelationError::InvalidAssertion { .. }
            | CorrelationError::InvalidJsonPath { .. }
            | CorrelationError::InvalidBuiltinArgs { .. } => ErrorKind::InvalidConfig,
        }
    }
}
