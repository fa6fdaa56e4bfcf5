use reqwest::{Client, Method, Request, Url};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult, HttpError};

/// Request shape accepted by the dispatcher:
/// `{method, url | path, query, headers, body}`. A string body is sent as is,
/// any other JSON body is serialized with a JSON content type.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub method: Method,
    pub url: Option<String>,
    pub path: Option<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestTemplate {
    /// # Errors
    ///
    /// Returns an error when `value` is not an object or names an unknown
    /// method.
    pub fn from_value(value: &Value) -> AppResult<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| AppError::http(HttpError::TemplateNotObject))?;
        let method = match fields.get("method").and_then(Value::as_str) {
            Some(raw) => parse_method(raw)?,
            None => Method::GET,
        };
        Ok(Self {
            method,
            url: text_field(fields, "url"),
            path: text_field(fields, "path"),
            query: pairs(fields.get("query")),
            headers: pairs(fields.get("headers")),
            body: fields.get("body").filter(|body| !body.is_null()).cloned(),
        })
    }

    /// Absolute URL: `url` wins, otherwise `path` is joined onto `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when neither is usable.
    pub fn resolve_url(&self, base_url: Option<&Url>) -> AppResult<Url> {
        if let Some(url) = self.url.as_ref() {
            return Url::parse(url).map_err(|err| {
                AppError::http(HttpError::InvalidUrl {
                    url: url.clone(),
                    source: err,
                })
            });
        }
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| AppError::http(HttpError::StepMissingUrlOrPath))?;
        let base = base_url.ok_or_else(|| AppError::http(HttpError::BaseUrlRequired))?;
        base.join(path).map_err(|err| {
            AppError::http(HttpError::JoinUrlFailed {
                url: path.clone(),
                source: err,
            })
        })
    }

    /// # Errors
    ///
    /// Returns an error when the URL cannot be resolved or reqwest rejects
    /// the request.
    pub fn build(
        &self,
        client: &Client,
        base_url: Option<&Url>,
        default_headers: &[(String, String)],
    ) -> AppResult<Request> {
        let url = self.resolve_url(base_url)?;
        let mut builder = client.request(self.method.clone(), url);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        for (key, value) in default_headers {
            if !has_header(&self.headers, key) {
                builder = builder.header(key, value);
            }
        }
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        match self.body.as_ref() {
            Some(Value::String(text)) => builder = builder.body(text.clone()),
            Some(body) => builder = builder.json(body),
            None => {}
        }
        builder
            .build()
            .map_err(|err| AppError::http(HttpError::BuildRequestFailed { source: err }))
    }
}

fn parse_method(raw: &str) -> AppResult<Method> {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        _ => Err(AppError::http(HttpError::UnsupportedMethod {
            method: raw.to_owned(),
        })),
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Object entries as string pairs; non-string values use their JSON text.
fn pairs(value: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|(key, value)| {
            let text = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_owned);
            (key.clone(), text)
        })
        .collect()
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers
        .iter()
        .any(|(key, _)| key.eq_ignore_ascii_case(name))
}
