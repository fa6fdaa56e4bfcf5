use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde_json::{Value, json};
use tracing::debug;

use crate::correlation::{CorrelationEngine, ResponseData, StepDispatcher};
use crate::error::{AppError, AppResult, HttpError};
use crate::exec::{Task, TaskContext, TaskFactory, TaskId};

use super::client::{HttpClientConfig, build_client};
use super::mix::RequestMix;
use super::request::RequestTemplate;

/// Sends resolved request templates with one shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    base_url: Option<Url>,
    headers: Vec<(String, String)>,
}

impl HttpDispatcher {
    /// # Errors
    ///
    /// Returns an error when the client cannot be built.
    pub fn new(config: &HttpClientConfig) -> AppResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.clone(),
            headers: config.headers.clone(),
        })
    }

    #[must_use]
    pub const fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// # Errors
    ///
    /// Returns an error when the request cannot be built, sent, or its body
    /// read.
    pub async fn send(&self, template: &RequestTemplate) -> AppResult<ResponseData> {
        let request = template.build(&self.client, self.base_url.as_ref(), &self.headers)?;
        debug!("{} {}", request.method(), request.url());
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| AppError::http(HttpError::RequestFailed { source: err }))?;
        into_response_data(response).await
    }
}

#[async_trait]
impl StepDispatcher for HttpDispatcher {
    async fn dispatch(&self, request: &Value) -> Result<ResponseData, String> {
        let template = RequestTemplate::from_value(request).map_err(|err| err.to_string())?;
        self.send(&template).await.map_err(|err| err.to_string())
    }
}

async fn into_response_data(response: Response) -> AppResult<ResponseData> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    let body = response
        .text()
        .await
        .map_err(|err| AppError::http(HttpError::RequestFailed { source: err }))?;
    Ok(ResponseData::new(status, headers, body))
}

/// Turns a request mix into executor tasks. Placeholders are resolved per
/// invocation, so built-ins such as `${random_num}` change every request.
pub struct HttpTaskFactory {
    dispatcher: Arc<HttpDispatcher>,
    mix: RequestMix,
    engine: CorrelationEngine,
    expected_status: Option<u16>,
}

impl HttpTaskFactory {
    #[must_use]
    pub const fn new(
        dispatcher: Arc<HttpDispatcher>,
        mix: RequestMix,
        engine: CorrelationEngine,
    ) -> Self {
        Self {
            dispatcher,
            mix,
            engine,
            expected_status: None,
        }
    }

    /// Without an expected status any 2xx response counts as a success.
    #[must_use]
    pub const fn with_expected_status(mut self, expected_status: Option<u16>) -> Self {
        self.expected_status = expected_status;
        self
    }
}

impl TaskFactory for HttpTaskFactory {
    fn make(&self, ctx: TaskContext) -> Task {
        let Some((label, request)) = self.mix.pick(ctx.index) else {
            return Task::new(TaskId(ctx.index), || async {
                Err("request mix has no requests".to_owned())
            });
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let request = request.clone();
        let engine = self.engine.clone();
        let expected_status = self.expected_status;
        Task::new(TaskId(ctx.index), move || {
            let dispatcher = Arc::clone(&dispatcher);
            let resolved = engine
                .resolve(&request)
                .map_err(|err| err.to_string())
                .and_then(|value| {
                    RequestTemplate::from_value(&value).map_err(|err| err.to_string())
                });
            async move {
                let response = dispatcher.send(&resolved?).await.map_err(|err| err.to_string())?;
                check_status(response.status, expected_status)?;
                Ok(json!({
                    "status": response.status,
                    "bytes": response.body.len(),
                }))
            }
        })
        .with_label(Arc::clone(label))
    }
}

fn check_status(status: u16, expected: Option<u16>) -> Result<(), String> {
    match expected {
        Some(expected) if status != expected => {
            Err(HttpError::UnexpectedStatus { status, expected }.to_string())
        }
        Some(_) => Ok(()),
        None if (200..300).contains(&status) => Ok(()),
        None => Err(format!("HTTP status {}", status)),
    }
}
