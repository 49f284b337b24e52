use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of script kinds; each has exactly one driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Maa,
    General,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Maa => "maa",
            ScriptKind::General => "general",
        }
    }
}

/// Process-level action requested by a queue once everything has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerAction {
    #[default]
    NoAction,
    Shutdown,
    ShutdownForce,
    Reboot,
    Hibernate,
    Sleep,
    KillSelf,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::NoAction => "NoAction",
            PowerAction::Shutdown => "Shutdown",
            PowerAction::ShutdownForce => "ShutdownForce",
            PowerAction::Reboot => "Reboot",
            PowerAction::Hibernate => "Hibernate",
            PowerAction::Sleep => "Sleep",
            PowerAction::KillSelf => "KillSelf",
        }
    }

    /// Human-readable name used in countdown messages
    pub fn label(&self) -> &'static str {
        match self {
            PowerAction::NoAction => "no action",
            PowerAction::Shutdown => "shutdown",
            PowerAction::ShutdownForce => "forced shutdown",
            PowerAction::Reboot => "reboot",
            PowerAction::Hibernate => "hibernate",
            PowerAction::Sleep => "sleep",
            PowerAction::KillSelf => "exit application",
        }
    }

    pub fn is_action(&self) -> bool {
        *self != PowerAction::NoAction
    }
}

impl FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoAction" => Ok(PowerAction::NoAction),
            "Shutdown" => Ok(PowerAction::Shutdown),
            "ShutdownForce" => Ok(PowerAction::ShutdownForce),
            "Reboot" => Ok(PowerAction::Reboot),
            "Hibernate" => Ok(PowerAction::Hibernate),
            "Sleep" => Ok(PowerAction::Sleep),
            "KillSelf" => Ok(PowerAction::KillSelf),
            _ => Err(format!("Unknown power action: {}", s)),
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn unlimited() -> i64 {
    -1
}

/// One user configured under a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Days of service left; negative means unlimited
    #[serde(default = "unlimited")]
    pub remaining_days: i64,
}

impl UserConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            remaining_days: -1,
        }
    }

    pub fn runnable(&self) -> bool {
        self.enabled && self.remaining_days != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub id: Uuid,
    pub name: String,
    pub kind: ScriptKind,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    /// Kind-specific settings, read by the driver only
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl ScriptConfig {
    pub fn new(name: impl Into<String>, kind: ScriptKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            users: Vec::new(),
            settings: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user: UserConfig) -> Self {
        self.users.push(user);
        self
    }

    pub fn user(&self, id: Uuid) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.id == id)
    }
}

/// Queue entry; `None` is the "no script" sentinel and is skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub script_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub startup_enabled: bool,
    #[serde(default)]
    pub after_accomplish: PowerAction,
    #[serde(default)]
    pub items: Vec<QueueItem>,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            startup_enabled: false,
            after_accomplish: PowerAction::NoAction,
            items: Vec::new(),
        }
    }

    pub fn with_script(mut self, script_id: Uuid) -> Self {
        self.items.push(QueueItem {
            script_id: Some(script_id),
        });
        self
    }

    /// Script ids in queue order, sentinel items dropped
    pub fn script_ids(&self) -> Vec<Uuid> {
        self.items.iter().filter_map(|item| item.script_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_power_action_names() {
        for action in [
            PowerAction::NoAction,
            PowerAction::Shutdown,
            PowerAction::ShutdownForce,
            PowerAction::Reboot,
            PowerAction::Hibernate,
            PowerAction::Sleep,
            PowerAction::KillSelf,
        ] {
            assert_eq!(action.as_str().parse::<PowerAction>(), Ok(action));
        }
        assert!("Explode".parse::<PowerAction>().is_err());
        assert_eq!(PowerAction::from_str("Reboot"), Ok(PowerAction::Reboot));
    }

    #[test]
    fn test_runnable_users() {
        let mut user = UserConfig::new("a");
        assert!(user.runnable());
        user.remaining_days = 0;
        assert!(!user.runnable());
        user.remaining_days = 3;
        user.enabled = false;
        assert!(!user.runnable());
    }

    #[test]
    fn test_queue_skips_sentinel_items() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut queue = QueueConfig::new("q").with_script(a);
        queue.items.push(QueueItem { script_id: None });
        let queue = queue.with_script(b);
        assert_eq!(queue.script_ids(), vec![a, b]);
    }
}
