use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::trace;

use crate::error::CorrelationError;

/// Named values shared by the steps of a session. Each operation is atomic;
/// the last write wins.
#[derive(Debug, Default)]
pub struct ParameterStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl ParameterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled with `values`.
    #[must_use]
    pub fn seeded(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        trace!("Setting parameter '{}'", name);
        self.write().insert(name, value.into());
    }

    /// # Errors
    ///
    /// Returns `KeyNotFound` when `name` was never set.
    pub fn get(&self, name: &str) -> Result<Value, CorrelationError> {
        self.lookup(name)
            .ok_or_else(|| CorrelationError::KeyNotFound {
                name: name.to_owned(),
            })
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.read().get(name).cloned()
    }

    #[must_use]
    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.lookup(name).unwrap_or(default)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.write().remove(name)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Adds `values`, overwriting entries with the same name.
    pub fn seed(&self, values: impl IntoIterator<Item = (String, Value)>) {
        self.write().extend(values);
    }

    /// Writes every pair under one lock so readers never see a partial batch.
    pub fn commit(&self, writes: Vec<(String, Value)>) {
        if writes.is_empty() {
            return;
        }
        let mut values = self.write();
        for (name, value) in writes {
            trace!("Committing extracted parameter '{}'", name);
            values.insert(name, value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
