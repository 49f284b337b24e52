// Core infrastructure: errors, configuration, tracing setup
pub mod core;

// Supervised units of work
pub mod unit;

// Live progress tree and change feed
pub mod progress;

// Collaborators at the edge of the dispatcher
pub mod notify;
pub mod store;

// Controllers, executors and the task registry
pub mod dispatch;

// Re-exports for convenience
pub use crate::core::{
    init_tracing, DispatchError, ErrorCategory, LoggingConfig, Result, SchedulerConfig,
    SchedulerConfigBuilder,
};
pub use dispatch::{
    DispatchController, Drivers, LoggingSystemActions, ScriptDriver, ScriptExecutor, ScriptRun,
    SnapshotPublisher, SystemActions, TaskManager, TaskManagerBuilder, UserAction, UserOutcome,
    STOPPED_BY_USER, STOP_ALL,
};
pub use notify::{
    BroadcastNotifier, BufferingNotifier, LoggingNotifier, MessageKind, Notification, Notifier,
    NotifyChannel, NullNotifier,
};
pub use progress::{
    ChangeFeed, ChangeHook, ChangeKind, ChangeRecord, LogRecord, ScriptHandle, ScriptRecord,
    ScriptSeed, Status, TaskMode, TaskRecord, TaskSnapshot, TaskTarget, UserHandle, UserRecord,
    UserSeed,
};
pub use store::{
    ConfigStore, MemoryConfigStore, PowerAction, QueueConfig, QueueItem, ScriptConfig, ScriptKind,
    ScriptLease, StoreSeed, UserConfig,
};
pub use unit::{Accomplish, CrashPolicy, Exit, Unit, UnitContext, UnitHandle, UnitState};
