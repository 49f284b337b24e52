use thiserror::Error;
use uuid::Uuid;

use crate::progress::Status;

/// Unified error type for the dispatch core
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatch target matched no queue, script or user
    #[error("Dispatch target not found: {target}")]
    TargetNotFound { target: String },

    /// The resolved script is already driven by another controller
    #[error("Script already running: {name}")]
    ScriptLocked { script_id: Uuid, name: String },

    /// An identifier could not be parsed
    #[error("Invalid identifier: {value}")]
    InvalidId { value: String },

    /// Stop requested for a task the registry does not know
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Stop requested twice for the same task
    #[error("Task already stopping: {task_id}")]
    AlreadyStopping { task_id: Uuid },

    /// Lock requested on a script that is already locked
    #[error("Script {script_id} is already locked")]
    AlreadyLocked { script_id: Uuid },

    /// Unlock requested on a script that is not locked
    #[error("Script {script_id} is not locked")]
    NotLocked { script_id: Uuid },

    /// Lock operation on a script the store does not contain
    #[error("Unknown script: {script_id}")]
    UnknownScript { script_id: Uuid },

    /// `execute()` called on a unit that has already been started
    #[error("Unit already started: {unit}")]
    AlreadyStarted { unit: String },

    /// `execute()` called on a unit that was spawned into a parent scope
    #[error("Unit {unit} is not a root unit; use spawn() from a running body")]
    NotRoot { unit: String },

    /// `spawn()` called without an open scope
    #[error("No open scope for {unit}: children must be spawned from a running body")]
    ScopeClosed { unit: String },

    /// A status write that would move a record backwards
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Status, to: Status },

    /// A progress index that would move backwards or past the end
    #[error("Index {requested} out of order (current {current}, length {len})")]
    IndexOutOfOrder {
        current: isize,
        requested: isize,
        len: usize,
    },

    /// A user attempt was opened while another one is still open
    #[error("User {user_id} already has an open attempt")]
    AttemptOpen { user_id: String },

    /// Attempt-level write with no open attempt
    #[error("User {user_id} has no open attempt")]
    NoOpenAttempt { user_id: String },

    /// Unexpected failure inside a unit body
    #[error("Unit {unit} crashed: {message}")]
    Crashed { unit: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// YAML decoding errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where an error belongs in the failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Reported synchronously from `add_task`; no controller is created
    Admission,
    /// Recorded as a terminal script status; the controller continues
    PerScript,
    /// Captured by `on_crash`; the only kind allowed to cross a scope
    Crash,
    /// Reported synchronously from `stop_task`; no state change
    Stop,
    Internal,
}

impl DispatchError {
    pub fn target_not_found(target: impl Into<String>) -> Self {
        Self::TargetNotFound {
            target: target.into(),
        }
    }

    pub fn invalid_id(value: impl Into<String>) -> Self {
        Self::InvalidId {
            value: value.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn crashed(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Crashed {
            unit: unit.into(),
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Classify the error for callers that need to decide what to surface
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TargetNotFound { .. } | Self::ScriptLocked { .. } | Self::InvalidId { .. } => {
                ErrorCategory::Admission
            }
            Self::AlreadyLocked { .. } | Self::UnknownScript { .. } => ErrorCategory::PerScript,
            Self::TaskNotFound { .. } | Self::AlreadyStopping { .. } => ErrorCategory::Stop,
            Self::Crashed { .. } => ErrorCategory::Crash,
            _ => ErrorCategory::Internal,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_errors_are_classified() {
        assert_eq!(
            DispatchError::target_not_found("abc").category(),
            ErrorCategory::Admission
        );
        let locked = DispatchError::ScriptLocked {
            script_id: Uuid::new_v4(),
            name: "daily".to_string(),
        };
        assert_eq!(locked.category(), ErrorCategory::Admission);
        assert!(locked.to_string().contains("daily"));
    }

    #[test]
    fn test_stop_errors_are_classified() {
        let err = DispatchError::TaskNotFound {
            task_id: "missing".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Stop);
        assert_eq!(
            DispatchError::AlreadyStopping {
                task_id: Uuid::nil()
            }
            .category(),
            ErrorCategory::Stop
        );
    }

    #[test]
    fn test_crash_display() {
        let err = DispatchError::crashed("controller", "boom");
        assert_eq!(err.category(), ErrorCategory::Crash);
        assert_eq!(err.to_string(), "Unit controller crashed: boom");
    }

    #[test]
    fn test_transition_display() {
        let err = DispatchError::InvalidTransition {
            from: Status::Done,
            to: Status::Running,
        };
        assert!(err.to_string().contains("Done"));
        assert_eq!(err.category(), ErrorCategory::Internal);
    }
}
