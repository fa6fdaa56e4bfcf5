use std::time::Duration;

use reqwest::{Client, Url, redirect};

use crate::args::DEFAULT_USER_AGENT;
use crate::error::{AppError, AppResult, HttpError};

const DEFAULT_REDIRECT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Joined with a template's `path` when it has no absolute `url`.
    pub base_url: Option<Url>,
    /// Sent with every request unless the template sets the same header.
    pub headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    /// 0 disables redirects.
    pub redirect_limit: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            base_url: None,
            headers: Vec::new(),
            user_agent: Some(DEFAULT_USER_AGENT.to_owned()),
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
        }
    }
}

impl HttpClientConfig {
    /// # Errors
    ///
    /// Returns an error when `base_url` is not an absolute URL.
    pub fn with_base_url(mut self, base_url: &str) -> AppResult<Self> {
        let parsed = Url::parse(base_url).map_err(|err| {
            AppError::http(HttpError::InvalidUrl {
                url: base_url.to_owned(),
                source: err,
            })
        })?;
        self.base_url = Some(parsed);
        Ok(self)
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// # Errors
///
/// Returns an error when reqwest cannot build the client.
pub fn build_client(config: &HttpClientConfig) -> AppResult<Client> {
    let mut builder = Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout);
    if let Some(user_agent) = config.user_agent.as_ref() {
        builder = builder.user_agent(user_agent.clone());
    }
    builder = if config.redirect_limit == 0 {
        builder.redirect(redirect::Policy::none())
    } else {
        builder.redirect(redirect::Policy::limited(config.redirect_limit))
    };
    builder
        .build()
        .map_err(|err| AppError::http(HttpError::BuildClientFailed { source: err }))
}
