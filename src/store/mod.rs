//! Configuration store collaborator
//!
//! The dispatcher only needs a narrow view of configuration: queue and script
//! lookup, the per-script advisory lock, and the process-wide pending power
//! action slot. [`ConfigStore`] is that view; [`MemoryConfigStore`] is the
//! in-process implementation.

pub mod lease;
pub mod memory;
pub mod types;

use uuid::Uuid;

use crate::core::errors::Result;

pub use lease::ScriptLease;
pub use memory::{MemoryConfigStore, StoreSeed};
pub use types::{PowerAction, QueueConfig, QueueItem, ScriptConfig, ScriptKind, UserConfig};

/// Read access to configuration plus the locking and power-slot operations.
///
/// Every method is a single atomic step with respect to the others.
pub trait ConfigStore: Send + Sync {
    fn queue(&self, id: Uuid) -> Option<QueueConfig>;

    /// All queues in configuration order
    fn queues(&self) -> Vec<QueueConfig>;

    fn script(&self, id: Uuid) -> Option<ScriptConfig>;

    /// The script that has a user with this id
    fn script_owning_user(&self, user_id: Uuid) -> Option<ScriptConfig>;

    /// Ordered script ids of a queue, skipping empty items
    fn queue_scripts(&self, id: Uuid) -> Option<Vec<Uuid>> {
        self.queue(id).map(|queue| queue.script_ids())
    }

    fn is_locked(&self, script_id: Uuid) -> bool;

    /// Fails if the script is unknown or already locked
    fn lock(&self, script_id: Uuid) -> Result<()>;

    /// Fails if the script is not locked
    fn unlock(&self, script_id: Uuid) -> Result<()>;

    fn pending_power_action(&self) -> PowerAction;

    /// Set the pending action if none is pending. Returns whether this call won.
    fn request_power_action(&self, action: PowerAction) -> bool;

    /// Reset the slot to `NoAction` and return what was pending
    fn take_power_action(&self) -> PowerAction;
}
