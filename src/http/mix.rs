use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;

const fn default_weight() -> u64 {
    1
}

/// One entry of a weighted request mix.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WeightedRequest {
    /// Label in per-request breakdowns; defaults to `METHOD path-or-url`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u64,
    pub request: Value,
}

#[derive(Debug, Clone)]
struct MixEntry {
    label: Arc<str>,
    request: Value,
    /// Exclusive end of this entry's slot range.
    upper: u64,
}

/// Request templates picked in proportion to their weights. Task `i` takes
/// slot `i % total_weight`, so every run of `total_weight` consecutive tasks
/// sends each request exactly `weight` times.
#[derive(Debug, Clone)]
pub struct RequestMix {
    entries: Vec<MixEntry>,
    total_weight: u64,
}

impl RequestMix {
    #[must_use]
    pub fn single(request: Value) -> Self {
        let label = default_label(&request);
        Self {
            entries: vec![MixEntry {
                label: Arc::from(label),
                request,
                upper: 1,
            }],
            total_weight: 1,
        }
    }

    /// Zero-weight entries are kept out of the rotation.
    ///
    /// # Errors
    ///
    /// Returns an error when the mix is empty or every weight is zero.
    pub fn new(requests: Vec<WeightedRequest>) -> Result<Self, ValidationError> {
        if requests.is_empty() {
            return Err(ValidationError::EmptyRequestMix);
        }
        let mut entries = Vec::with_capacity(requests.len());
        let mut total_weight: u64 = 0;
        for entry in requests {
            if entry.weight == 0 {
                continue;
            }
            total_weight = total_weight
                .checked_add(entry.weight)
                .ok_or(ValidationError::RequestMixWeightOverflow)?;
            let label = entry
                .name
                .unwrap_or_else(|| default_label(&entry.request));
            entries.push(MixEntry {
                label: Arc::from(label),
                request: entry.request,
                upper: total_weight,
            });
        }
        if total_weight == 0 {
            return Err(ValidationError::RequestMixWeightZero);
        }
        Ok(Self {
            entries,
            total_weight,
        })
    }

    /// Label and template for the task with submission index `index`.
    #[must_use]
    pub fn pick(&self, index: u64) -> Option<(&Arc<str>, &Value)> {
        let slot = index.checked_rem(self.total_weight)?;
        self.entries
            .iter()
            .find(|entry| slot < entry.upper)
            .map(|entry| (&entry.label, &entry.request))
    }
}

fn default_label(request: &Value) -> String {
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let target = request
        .get("path")
        .or_else(|| request.get("url"))
        .and_then(Value::as_str)
        .unwrap_or("?");
    format!("{} {}", method, target)
}
