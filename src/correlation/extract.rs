use jsonpath_lib::{JsonPathError, select};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CorrelationError;

/// The parts of a response that extraction rules can read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseData {
    pub status: u16,
    /// Header pairs in arrival order; names keep their original case.
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Parsed body, when it is JSON.
    pub json: Option<Value>,
}

impl ResponseData {
    #[must_use]
    pub fn new(status: u16, headers: Vec<(String, String)>, body: String) -> Self {
        let json = serde_json::from_str(&body).ok();
        Self {
            status,
            headers,
            body,
            json,
        }
    }

    /// A 200 response carrying `value` as its JSON body.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: value.to_string(),
            json: Some(value),
        }
    }

    /// First header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value of cookie `name` from the `Set-Cookie` headers.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("set-cookie"))
            .find_map(|(_, value)| {
                let pair = value.split(';').next()?;
                let (cookie, cookie_value) = pair.split_once('=')?;
                (cookie.trim() == name).then_some(cookie_value.trim())
            })
    }
}

const fn default_required() -> bool {
    true
}

const fn default_group() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractSource {
    JsonPath {
        path: String,
    },
    Regex {
        pattern: String,
        /// Capture group; 0 is the whole match.
        #[serde(default = "default_group")]
        group: usize,
    },
    Header {
        name: String,
    },
    Cookie {
        name: String,
    },
    StatusCode,
    BodyLength,
}

impl ExtractSource {
    fn describe(&self) -> String {
        match self {
            Self::JsonPath { path } => format!("jsonpath {}", path),
            Self::Regex { pattern, group } => format!("regex {} (group {})", pattern, group),
            Self::Header { name } => format!("header {}", name),
            Self::Cookie { name } => format!("cookie {}", name),
            Self::StatusCode => "status code".to_owned(),
            Self::BodyLength => "body length".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExtractionRule {
    pub target: String,
    #[serde(flatten)]
    pub source: ExtractSource,
    #[serde(default = "default_required")]
    pub required: bool,
}

impl ExtractionRule {
    #[must_use]
    pub fn new(target: impl Into<String>, source: ExtractSource) -> Self {
        Self {
            target: target.into(),
            source,
            required: true,
        }
    }

    #[must_use]
    pub fn json_path(target: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(target, ExtractSource::JsonPath { path: path.into() })
    }

    #[must_use]
    pub fn regex(target: impl Into<String>, pattern: impl Into<String>, group: usize) -> Self {
        Self::new(
            target,
            ExtractSource::Regex {
                pattern: pattern.into(),
                group,
            },
        )
    }

    #[must_use]
    pub fn header(target: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(target, ExtractSource::Header { name: name.into() })
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    JsonPath(String),
    Regex { regex: Regex, group: usize },
    Header(String),
    Cookie(String),
    StatusCode,
    BodyLength,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    target: String,
    required: bool,
    source_expr: String,
    matcher: Matcher,
}

/// Rules with their patterns validated and compiled once.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

impl CompiledRules {
    /// # Errors
    ///
    /// Returns an error for an invalid regex or JSONPath expression.
    pub fn compile(rules: &[ExtractionRule]) -> Result<Self, CorrelationError> {
        let rules = rules
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates every rule against `response` in declaration order. Nothing
    /// is returned for optional rules that found no match.
    ///
    /// # Errors
    ///
    /// Returns `ExtractionFailed` for the first required rule without a match.
    pub fn evaluate(
        &self,
        response: &ResponseData,
    ) -> Result<Vec<(String, Value)>, CorrelationError> {
        let mut writes = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            match apply(&rule.matcher, response) {
                Some(value) => writes.push((rule.target.clone(), value)),
                None if rule.required => {
                    return Err(CorrelationError::ExtractionFailed {
                        target: rule.target.clone(),
                        source_expr: rule.source_expr.clone(),
                    });
                }
                None => debug!(
                    "Optional extraction '{}' found no match for {}",
                    rule.target, rule.source_expr
                ),
            }
        }
        Ok(writes)
    }
}

fn compile_rule(rule: &ExtractionRule) -> Result<CompiledRule, CorrelationError> {
    let matcher = match &rule.source {
        ExtractSource::JsonPath { path } => {
            // Only a parse failure is a config error; a null document
            // may still report a missing value.
            if let Err(JsonPathError::Path(_)) = select(&Value::Null, path) {
                return Err(CorrelationError::InvalidJsonPath {
                    target: rule.target.clone(),
                    path: path.clone(),
                });
            }
            Matcher::JsonPath(path.clone())
        }
        ExtractSource::Regex { pattern, group } => {
            let regex = Regex::new(pattern).map_err(|err| CorrelationError::InvalidRegex {
                target: rule.target.clone(),
                pattern: pattern.clone(),
                source: err,
            })?;
            Matcher::Regex {
                regex,
                group: *group,
            }
        }
        ExtractSource::Header { name } => Matcher::Header(name.clone()),
        ExtractSource::Cookie { name } => Matcher::Cookie(name.clone()),
        ExtractSource::StatusCode => Matcher::StatusCode,
        ExtractSource::BodyLength => Matcher::BodyLength,
    };
    Ok(CompiledRule {
        target: rule.target.clone(),
        required: rule.required,
        source_expr: rule.source.describe(),
        matcher,
    })
}

fn apply(matcher: &Matcher, response: &ResponseData) -> Option<Value> {
    match matcher {
        Matcher::JsonPath(path) => select_json_path(response.json.as_ref()?, path),
        Matcher::Regex { regex, group } => regex
            .captures(&response.body)
            .and_then(|captures| captures.get(*group))
            .map(|found| Value::from(found.as_str())),
        Matcher::Header(name) => response.header(name).map(Value::from),
        Matcher::Cookie(name) => response.cookie(name).map(Value::from),
        Matcher::StatusCode => Some(Value::from(response.status)),
        Matcher::BodyLength => Some(Value::from(response.body.len())),
    }
}

/// One match yields the value itself, several become an array.
pub(super) fn select_json_path(document: &Value, path: &str) -> Option<Value> {
    let matches = select(document, path).ok()?;
    match matches.as_slice() {
        [] => None,
        [single] => Some((*single).clone()),
        many => Some(Value::Array(many.iter().map(|value| (*value).clone()).collect())),
    }
}
