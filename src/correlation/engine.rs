use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CorrelationError;
use crate::params::{ParameterStore, builtins};

use super::extract::{CompiledRules, ExtractionRule, ResponseData};
use super::template;

/// What happens to a `${name}` that neither the store nor a built-in knows.
#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedMode {
    /// Fail with `UnresolvedParameter`.
    #[default]
    Fail,
    /// Keep the placeholder text as is.
    Leave,
}

/// Resolves placeholders before dispatch and writes extracted values back
/// after it. The store is passed in; the engine never owns global state.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    store: Arc<ParameterStore>,
    mode: UnresolvedMode,
}

impl CorrelationEngine {
    #[must_use]
    pub const fn new(store: Arc<ParameterStore>) -> Self {
        Self {
            store,
            mode: UnresolvedMode::Fail,
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: UnresolvedMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    #[must_use]
    pub const fn mode(&self) -> UnresolvedMode {
        self.mode
    }

    /// Substitutes placeholders in `input`. Store entries shadow built-ins;
    /// non-string values are inserted in their JSON text form.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedParameter` for an unknown name in `Fail` mode, or a
    /// built-in argument error.
    pub fn resolve_str(&self, input: &str) -> Result<String, CorrelationError> {
        template::render(input, |name| {
            if let Some(value) = self.store.lookup(name) {
                return Ok(Some(stringify(&value)));
            }
            if let Some(value) = builtins::evaluate(name) {
                return value.map(|value| Some(stringify(&value)));
            }
            match self.mode {
                UnresolvedMode::Fail => Err(CorrelationError::UnresolvedParameter {
                    name: name.to_owned(),
                }),
                UnresolvedMode::Leave => {
                    debug!("Leaving '${{{}}}' unresolved", name);
                    Ok(None)
                }
            }
        })
    }

    /// Walks `value` and resolves every string, object keys included.
    ///
    /// # Errors
    ///
    /// Same as [`CorrelationEngine::resolve_str`].
    pub fn resolve(&self, value: &Value) -> Result<Value, CorrelationError> {
        match value {
            Value::String(text) => self.resolve_str(text).map(Value::String),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => {
                let mut resolved = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    resolved.insert(self.resolve_str(key)?, self.resolve(field)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(value.clone()),
        }
    }

    /// Applies `rules` to `response` and commits the extracted values. No
    /// value is written unless every required rule matched.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid rule or a required rule without a
    /// match.
    pub fn extract(
        &self,
        response: &ResponseData,
        rules: &[ExtractionRule],
    ) -> Result<Vec<String>, CorrelationError> {
        let compiled = CompiledRules::compile(rules)?;
        self.extract_compiled(response, &compiled)
    }

    /// [`CorrelationEngine::extract`] with rules compiled up front. Returns
    /// the names that were written.
    ///
    /// # Errors
    ///
    /// Returns `ExtractionFailed` for a required rule without a match.
    pub fn extract_compiled(
        &self,
        response: &ResponseData,
        rules: &CompiledRules,
    ) -> Result<Vec<String>, CorrelationError> {
        let writes = rules.evaluate(response)?;
        let names = writes.iter().map(|(name, _)| name.clone()).collect();
        self.store.commit(writes);
        Ok(names)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            value.to_string()
        }
    }
}
