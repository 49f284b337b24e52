use serde::{Deserialize, Serialize};

use super::status::Status;
use super::tree::{ScriptRecord, TaskRecord, UserRecord};

/// Outward shape of one script, as pushed on every change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    pub name: String,
    pub status: Status,
    #[serde(rename = "userList")]
    pub user_list: Vec<UserSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub name: String,
    pub status: Status,
}

pub type TaskSnapshot = Vec<ScriptSnapshot>;

impl UserRecord {
    /// One `HH:MM - status` entry per attempt
    pub fn result(&self) -> String {
        if self.logs.is_empty() {
            return "not started".to_string();
        }
        self.logs
            .iter()
            .map(|(started, log)| format!("{} - {}", started.format("%H:%M"), log.status))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            name: self.name.clone(),
            status: self.status,
        }
    }
}

impl ScriptRecord {
    pub fn result(&self) -> String {
        if self.users.is_empty() {
            return "users not loaded".to_string();
        }
        self.users
            .iter()
            .map(|user| format!("{}: {}", user.name, user.result()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn completed_users(&self) -> usize {
        self.users.iter().filter(|u| u.status == Status::Done).count()
    }

    pub fn uncompleted_users(&self) -> usize {
        self.users.len() - self.completed_users()
    }

    pub fn snapshot(&self) -> ScriptSnapshot {
        ScriptSnapshot {
            name: self.name.clone(),
            status: self.status,
            user_list: self.users.iter().map(UserRecord::snapshot).collect(),
        }
    }

    fn paragraph(&self) -> String {
        let body = self.result().replace('\n', "\n    ");
        format!(
            "{}:\n\n    completed users: {}; uncompleted users: {}\n\n    {}",
            self.name,
            self.completed_users(),
            self.uncompleted_users(),
            body
        )
    }
}

impl TaskRecord {
    /// Human-readable summary, one paragraph per script. Pure read; valid at
    /// any point of the run.
    pub fn result(&self) -> String {
        let scripts = self.scripts();
        if scripts.is_empty() {
            return "task not loaded".to_string();
        }
        scripts
            .iter()
            .map(ScriptRecord::paragraph)
            .collect::<Vec<_>>()
            .join("\n\n\n")
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.scripts().iter().map(ScriptRecord::snapshot).collect()
    }

    /// Scripts that reached `Done`
    pub fn completed_scripts(&self) -> usize {
        self.scripts()
            .iter()
            .filter(|s| s.status == Status::Done)
            .count()
    }
}
