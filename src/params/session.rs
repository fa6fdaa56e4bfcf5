use std::sync::Arc;

use tracing::debug;

use super::store::ParameterStore;

/// Scope of one test session. The store is cleared when the session starts
/// and again when it is dropped.
#[derive(Debug)]
pub struct Session {
    store: Arc<ParameterStore>,
}

impl Session {
    #[must_use]
    pub fn start(store: Arc<ParameterStore>) -> Self {
        store.clear();
        debug!("Parameter session started");
        Self { store }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let leftover = self.store.len();
        self.store.clear();
        debug!("Parameter session ended, cleared {} entries", leftover);
    }
}
