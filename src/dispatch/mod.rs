//! Dispatch: the per-request controller, the per-script and per-user
//! executors it spawns, and the [`TaskManager`] registry in front of them.

pub mod controller;
pub mod executor;
pub mod manager;
pub mod system;

pub use controller::DispatchController;
pub use executor::{
    Drivers, ScriptDriver, ScriptExecutor, ScriptRun, UserAction, UserOutcome, STOPPED_BY_USER,
};
pub use manager::{SnapshotPublisher, TaskManager, TaskManagerBuilder, STOP_ALL};
pub use system::{LoggingSystemActions, SystemActions};
