use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {source}")]
    BuildClientFailed {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Step request is missing url/path.")]
    StepMissingUrlOrPath,
    #[error("base_url is required for relative paths.")]
    BaseUrlRequired,
    #[error("Failed to join URL '{url}': {source}")]
    JoinUrlFailed {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Unsupported HTTP method '{method}'.")]
    UnsupportedMethod { method: String },
    #[error("Request template must be a JSON object.")]
    TemplateNotObject,
    #[error("Failed to build request: {source}")]
    BuildRequestFailed {
        #[source]
        source: reqwest::Error,
    },
    #[error("Request failed: {source}")]
    RequestFailed {
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected status {status} (expected {expected}).")]
    UnexpectedStatus { status: u16, expected: u16 },
}
