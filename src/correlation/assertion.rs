use std::cmp::Ordering;

use jsonpath_lib::{JsonPathError, select};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::CorrelationError;

use super::extract::{ResponseData, select_json_path};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Le => matches!(ordering, Ordering::Less | Ordering::Equal),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Ge => matches!(ordering, Ordering::Greater | Ordering::Equal),
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Ne => !matches!(ordering, Ordering::Equal),
        }
    }
}

/// A check on a step's response. JSONPath variants select from the parsed
/// body; a path matching several nodes yields an array.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    JsonEquals {
        path: String,
        expected: Value,
    },
    /// Substring for strings, element for arrays, key/value subset for
    /// objects.
    JsonContains {
        path: String,
        expected: Value,
    },
    JsonExists {
        path: String,
    },
    BodyContains {
        text: String,
    },
    Regex {
        pattern: String,
    },
    /// Numeric comparison; numeric strings are accepted.
    Compare {
        path: String,
        op: CompareOp,
        value: Number,
    },
    /// Inclusive on both ends.
    Between {
        path: String,
        min: Number,
        max: Number,
    },
    /// Character, element or key count. Without a path, the raw body.
    Length {
        #[serde(default)]
        path: Option<String>,
        expected: usize,
    },
}

impl Assertion {
    fn describe(&self) -> String {
        match self {
            Self::JsonEquals { path, expected } => format!("{} == {}", path, expected),
            Self::JsonContains { path, expected } => format!("{} contains {}", path, expected),
            Self::JsonExists { path } => format!("{} exists", path),
            Self::BodyContains { text } => format!("body contains '{}'", text),
            Self::Regex { pattern } => format!("body matches /{}/", pattern),
            Self::Compare { path, op, value } => format!("{} {:?} {}", path, op, value),
            Self::Between { path, min, max } => format!("{} in [{}, {}]", path, min, max),
            Self::Length {
                path: Some(path),
                expected,
            } => format!("len({}) == {}", path, expected),
            Self::Length {
                path: None,
                expected,
            } => format!("len(body) == {}", expected),
        }
    }

    const fn json_path(&self) -> Option<&String> {
        match self {
            Self::JsonEquals { path, .. }
            | Self::JsonContains { path, .. }
            | Self::JsonExists { path }
            | Self::Compare { path, .. }
            | Self::Between { path, .. }
            | Self::Length {
                path: Some(path), ..
            } => Some(path),
            Self::BodyContains { .. } | Self::Regex { .. } | Self::Length { path: None, .. } => {
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledAssertion {
    assertion: Assertion,
    regex: Option<Regex>,
}

/// Assertions with paths validated and patterns compiled once.
#[derive(Debug, Clone, Default)]
pub struct CompiledAssertions {
    items: Vec<CompiledAssertion>,
}

impl CompiledAssertions {
    /// # Errors
    ///
    /// Returns `InvalidAssertion` for a malformed JSONPath or regex.
    pub fn compile(assertions: &[Assertion]) -> Result<Self, CorrelationError> {
        let items = assertions
            .iter()
            .map(|assertion| {
                if let Some(path) = assertion.json_path()
                    && let Err(JsonPathError::Path(reason)) = select(&Value::Null, path)
                {
                    return Err(CorrelationError::InvalidAssertion {
                        assertion: assertion.describe(),
                        reason,
                    });
                }
                let regex = match assertion {
                    Assertion::Regex { pattern } => Some(Regex::new(pattern).map_err(|err| {
                        CorrelationError::InvalidAssertion {
                            assertion: assertion.describe(),
                            reason: err.to_string(),
                        }
                    })?),
                    Assertion::JsonEquals { .. }
                    | Assertion::JsonContains { .. }
                    | Assertion::JsonExists { .. }
                    | Assertion::BodyContains { .. }
                    | Assertion::Compare { .. }
                    | Assertion::Between { .. }
                    | Assertion::Length { .. } => None,
                };
                Ok(CompiledAssertion {
                    assertion: assertion.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { items })
    }

    /// Evaluates in declaration order and stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `AssertionFailed` naming the failed check.
    pub fn check(&self, response: &ResponseData) -> Result<(), CorrelationError> {
        for item in &self.items {
            evaluate(item, response).map_err(|detail| CorrelationError::AssertionFailed {
                assertion: item.assertion.describe(),
                detail,
            })?;
        }
        Ok(())
    }
}

fn evaluate(item: &CompiledAssertion, response: &ResponseData) -> Result<(), String> {
    match &item.assertion {
        Assertion::JsonEquals { path, expected } => {
            let actual = selected(response, path)?;
            if &actual == expected {
                Ok(())
            } else {
                Err(format!("got {}", actual))
            }
        }
        Assertion::JsonContains { path, expected } => {
            let actual = selected(response, path)?;
            if contains(&actual, expected) {
                Ok(())
            } else {
                Err(format!("got {}", actual))
            }
        }
        Assertion::JsonExists { path } => selected(response, path).map(|_| ()),
        Assertion::BodyContains { text } => {
            if response.body.contains(text.as_str()) {
                Ok(())
            } else {
                Err("text not found in body".to_owned())
            }
        }
        Assertion::Regex { .. } => match item.regex.as_ref() {
            Some(regex) if regex.is_match(&response.body) => Ok(()),
            Some(_) | None => Err("body did not match".to_owned()),
        },
        Assertion::Compare { path, op, value } => {
            let actual = selected(response, path)?;
            let ordering = compare(&actual, value)?;
            if op.holds(ordering) {
                Ok(())
            } else {
                Err(format!("got {}", actual))
            }
        }
        Assertion::Between { path, min, max } => {
            let actual = selected(response, path)?;
            let in_range = CompareOp::Ge.holds(compare(&actual, min)?)
                && CompareOp::Le.holds(compare(&actual, max)?);
            if in_range {
                Ok(())
            } else {
                Err(format!("got {}", actual))
            }
        }
        Assertion::Length { path, expected } => {
            let length = match path {
                Some(path) => length_of(&selected(response, path)?)?,
                None => response.body.chars().count(),
            };
            if length == *expected {
                Ok(())
            } else {
                Err(format!("length was {}", length))
            }
        }
    }
}

fn selected(response: &ResponseData, path: &str) -> Result<Value, String> {
    let document = response
        .json
        .as_ref()
        .ok_or_else(|| "body is not JSON".to_owned())?;
    select_json_path(document, path).ok_or_else(|| "path matched nothing".to_owned())
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
        (Value::Array(items), _) => items.contains(expected),
        (Value::Object(fields), Value::Object(subset)) => subset
            .iter()
            .all(|(key, value)| fields.get(key) == Some(value)),
        (
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Object(_),
            _,
        ) => false,
    }
}

fn compare(actual: &Value, bound: &Number) -> Result<Ordering, String> {
    let number = match actual {
        Value::Number(number) => number.clone(),
        Value::String(text) => text
            .trim()
            .parse::<Number>()
            .map_err(|err| format!("'{}' is not numeric: {}", text, err))?,
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            return Err(format!("{} is not numeric", actual));
        }
    };
    compare_numbers(&number, bound).ok_or_else(|| format!("{} cannot be compared", number))
}

fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    let as_integer =
        |number: &Number| number.as_i64().map(i128::from).or_else(|| number.as_u64().map(i128::from));
    match (as_integer(left), as_integer(right)) {
        (Some(left), Some(right)) => Some(left.cmp(&right)),
        (None, _) | (_, None) => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn length_of(value: &Value) -> Result<usize, String> {
    match value {
        Value::String(text) => Ok(text.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(fields) => Ok(fields.len()),
        Value::Null | Value::Bool(_) | Value::Number(_) => Err(format!("{} has no length", value)),
    }
}
