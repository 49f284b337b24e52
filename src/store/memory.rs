use std::path::Path;

use dashmap::DashSet;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{PowerAction, QueueConfig, ScriptConfig};
use super::ConfigStore;
use crate::core::errors::{DispatchError, Result};

/// Queues and scripts a store is seeded with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSeed {
    pub queues: Vec<QueueConfig>,
    pub scripts: Vec<ScriptConfig>,
}

/// In-process [`ConfigStore`]
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    queues: RwLock<IndexMap<Uuid, QueueConfig>>,
    scripts: RwLock<IndexMap<Uuid, ScriptConfig>>,
    locks: DashSet<Uuid>,
    power: Mutex<PowerAction>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        let store = Self::new();
        for script in seed.scripts {
            store.insert_script(script);
        }
        for queue in seed.queues {
            store.insert_queue(queue);
        }
        store
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let seed: StoreSeed = serde_yaml::from_str(yaml)?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&content)
    }

    pub fn insert_queue(&self, queue: QueueConfig) {
        debug!(queue_id = %queue.id, name = %queue.name, "Queue registered");
        self.queues.write().insert(queue.id, queue);
    }

    pub fn insert_script(&self, script: ScriptConfig) {
        debug!(script_id = %script.id, name = %script.name, "Script registered");
        self.scripts.write().insert(script.id, script);
    }

    pub fn remove_queue(&self, id: Uuid) -> Option<QueueConfig> {
        self.queues.write().shift_remove(&id)
    }

    /// Delete a script. Refused while a controller holds its lock.
    pub fn remove_script(&self, id: Uuid) -> Result<Option<ScriptConfig>> {
        let mut scripts = self.scripts.write();
        if self.locks.contains(&id) {
            return Err(DispatchError::AlreadyLocked { script_id: id });
        }
        let removed = scripts.shift_remove(&id);
        if removed.is_some() {
            info!(script_id = %id, "Script removed");
        }
        Ok(removed)
    }

    pub fn locked_scripts(&self) -> Vec<Uuid> {
        self.locks.iter().map(|id| *id).collect()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn queue(&self, id: Uuid) -> Option<QueueConfig> {
        self.queues.read().get(&id).cloned()
    }

    fn queues(&self) -> Vec<QueueConfig> {
        self.queues.read().values().cloned().collect()
    }

    fn script(&self, id: Uuid) -> Option<ScriptConfig> {
        self.scripts.read().get(&id).cloned()
    }

    fn script_owning_user(&self, user_id: Uuid) -> Option<ScriptConfig> {
        self.scripts
            .read()
            .values()
            .find(|script| script.user(user_id).is_some())
            .cloned()
    }

    fn is_locked(&self, script_id: Uuid) -> bool {
        self.locks.contains(&script_id)
    }

    fn lock(&self, script_id: Uuid) -> Result<()> {
        // Held across the insert so a concurrent remove_script cannot interleave
        let scripts = self.scripts.read();
        if !scripts.contains_key(&script_id) {
            return Err(DispatchError::UnknownScript { script_id });
        }
        if !self.locks.insert(script_id) {
            return Err(DispatchError::AlreadyLocked { script_id });
        }
        debug!(script_id = %script_id, "Script locked");
        Ok(())
    }

    fn unlock(&self, script_id: Uuid) -> Result<()> {
        if self.locks.remove(&script_id).is_none() {
            return Err(DispatchError::NotLocked { script_id });
        }
        debug!(script_id = %script_id, "Script unlocked");
        Ok(())
    }

    fn pending_power_action(&self) -> PowerAction {
        *self.power.lock()
    }

    fn request_power_action(&self, action: PowerAction) -> bool {
        if !action.is_action() {
            return false;
        }
        let mut slot = self.power.lock();
        if slot.is_action() {
            return false;
        }
        *slot = action;
        true
    }

    fn take_power_action(&self) -> PowerAction {
        std::mem::take(&mut *self.power.lock())
    }
}
