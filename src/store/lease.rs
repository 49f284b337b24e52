use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::ConfigStore;
use crate::core::errors::Result;

/// An acquired script lock. Released explicitly by finishers; dropping an
/// unreleased lease releases it too.
pub struct ScriptLease {
    script_id: Uuid,
    store: Option<Arc<dyn ConfigStore>>,
}

impl ScriptLease {
    pub fn acquire(store: Arc<dyn ConfigStore>, script_id: Uuid) -> Result<Self> {
        store.lock(script_id)?;
        Ok(Self {
            script_id,
            store: Some(store),
        })
    }

    pub fn script_id(&self) -> Uuid {
        self.script_id
    }

    pub fn release(mut self) -> Result<()> {
        match self.store.take() {
            Some(store) => store.unlock(self.script_id),
            None => Ok(()),
        }
    }
}

impl Drop for ScriptLease {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(e) = store.unlock(self.script_id) {
                warn!(script_id = %self.script_id, error = %e, "Dropped lease failed to unlock");
            }
        }
    }
}

impl std::fmt::Debug for ScriptLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLease")
            .field("script_id", &self.script_id)
            .field("held", &self.store.is_some())
            .finish()
    }
}
