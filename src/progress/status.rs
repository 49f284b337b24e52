use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution status shared by scripts and users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Waiting,
    Running,
    Skipped,
    Error,
    Done,
}

impl Status {
    fn rank(self) -> u8 {
        match self {
            Status::Waiting => 0,
            Status::Running => 1,
            Status::Skipped | Status::Error | Status::Done => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// `Waiting -> Running -> {Done, Error, Skipped}`, never backwards and
    /// never from one terminal state to another.
    pub fn can_transition_to(self, next: Status) -> bool {
        self == next || next.rank() > self.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Skipped => "skipped",
            Status::Error => "error",
            Status::Done => "done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of run a dispatch performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskMode {
    AutoProxy,
    ManualReview,
    ScriptConfig,
}

impl TaskMode {
    pub fn label(self) -> &'static str {
        match self {
            TaskMode::AutoProxy => "auto proxy",
            TaskMode::ManualReview => "manual review",
            TaskMode::ScriptConfig => "script config",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Log captured during one attempt of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lines: Vec<String>,
    pub status: String,
}

impl Default for LogRecord {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            status: "log monitoring not started".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Status::Waiting.can_transition_to(Status::Running));
        assert!(Status::Running.can_transition_to(Status::Done));
        assert!(Status::Waiting.can_transition_to(Status::Skipped));
        assert!(Status::Waiting.can_transition_to(Status::Error));
        assert!(Status::Done.can_transition_to(Status::Done));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!Status::Running.can_transition_to(Status::Waiting));
        assert!(!Status::Done.can_transition_to(Status::Running));
        assert!(!Status::Error.can_transition_to(Status::Done));
        assert!(!Status::Done.can_transition_to(Status::Error));
    }
}
