//! Shared fixtures for dispatch integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use mas_dispatch::{
    BufferingNotifier, ConfigStore, Drivers, MemoryConfigStore, PowerAction, QueueConfig,
    SchedulerConfig, ScriptConfig, ScriptDriver, ScriptKind, ScriptRun, SystemActions,
    TaskManager, UserConfig, UserHandle, UserOutcome,
};
use parking_lot::Mutex;

/// Drives every user by sleeping for a per-script latency, then reports `Done`
#[derive(Default)]
pub struct MockDriver {
    latency: Mutex<HashMap<String, Duration>>,
    completed: Mutex<Vec<String>>,
    driven: Mutex<Vec<String>>,
    failing_check: Mutex<Vec<String>>,
    crashing: Mutex<Vec<String>>,
    finish_delay: Mutex<Duration>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_latency(&self, script: &str, latency: Duration) {
        self.latency.lock().insert(script.to_string(), latency);
    }

    pub fn set_finish_delay(&self, delay: Duration) {
        *self.finish_delay.lock() = delay;
    }

    pub fn fail_check(&self, script: &str) {
        self.failing_check.lock().push(script.to_string());
    }

    /// Make every user of `script` fail with an error once its latency passes
    pub fn crash_on(&self, script: &str) {
        self.crashing.lock().push(script.to_string());
    }

    /// Script names in the order their last user finished
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// User names in the order they were driven
    pub fn driven(&self) -> Vec<String> {
        self.driven.lock().clone()
    }
}

#[async_trait]
impl ScriptDriver for MockDriver {
    async fn check(&self, run: &ScriptRun) -> Result<(), String> {
        if self.failing_check.lock().contains(&run.config.name) {
            return Err(format!("{} is not installed", run.config.name));
        }
        Ok(())
    }

    async fn drive_user(&self, run: &ScriptRun, user: &UserHandle) -> anyhow::Result<UserOutcome> {
        let name = user.record().map(|u| u.name).unwrap_or_default();
        self.driven.lock().push(name);
        user.begin_attempt(Local::now())?;
        let latency = self
            .latency
            .lock()
            .get(&run.config.name)
            .copied()
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(latency).await;
        if self.crashing.lock().contains(&run.config.name) {
            anyhow::bail!("adb disconnected");
        }
        user.append_log("run finished")?;
        user.close_attempt("Success!")?;
        Ok(UserOutcome::Done)
    }

    async fn finish(&self, run: &ScriptRun) -> anyhow::Result<()> {
        let delay = *self.finish_delay.lock();
        tokio::time::sleep(delay).await;
        self.completed.lock().push(run.config.name.clone());
        Ok(())
    }
}

/// Never finishes a user on its own; only cancellation ends it
pub struct HangingDriver;

#[async_trait]
impl ScriptDriver for HangingDriver {
    async fn drive_user(&self, _run: &ScriptRun, user: &UserHandle) -> anyhow::Result<UserOutcome> {
        user.begin_attempt(Local::now())?;
        std::future::pending::<()>().await;
        Ok(UserOutcome::Done)
    }
}

/// Remembers every power task it was asked to start
#[derive(Default)]
pub struct RecordingSystemActions {
    calls: Mutex<Vec<PowerAction>>,
}

impl RecordingSystemActions {
    pub fn calls(&self) -> Vec<PowerAction> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SystemActions for RecordingSystemActions {
    async fn start_power_task(
        &self,
        action: PowerAction,
        _countdown: Duration,
    ) -> anyhow::Result<()> {
        self.calls.lock().push(action);
        Ok(())
    }
}

pub struct Fixture {
    pub store: Arc<MemoryConfigStore>,
    pub notifier: Arc<BufferingNotifier>,
    pub system: Arc<RecordingSystemActions>,
    pub manager: TaskManager,
}

impl Fixture {
    pub fn new(driver: Arc<dyn ScriptDriver>) -> Self {
        let store = Arc::new(MemoryConfigStore::new());
        let notifier = Arc::new(BufferingNotifier::new());
        let system = Arc::new(RecordingSystemActions::default());
        let config = SchedulerConfig::builder()
            .power_countdown_secs(1)
            .build()
            .expect("valid config");
        let manager = TaskManager::builder()
            .store(store.clone() as Arc<dyn ConfigStore>)
            .drivers(Drivers::uniform(driver))
            .notifier(notifier.clone())
            .system_actions(system.clone())
            .config(config)
            .build()
            .expect("manager builds");
        Self {
            store,
            notifier,
            system,
            manager,
        }
    }

    /// Register a script with `users` named users
    pub fn script(&self, name: &str, users: &[&str]) -> ScriptConfig {
        let mut script = ScriptConfig::new(name, ScriptKind::General);
        for user in users {
            script = script.with_user(UserConfig::new(*user));
        }
        self.store.insert_script(script.clone());
        script
    }

    pub fn queue(&self, name: &str, scripts: &[&ScriptConfig], after: PowerAction) -> QueueConfig {
        let mut queue = QueueConfig::new(name);
        queue.after_accomplish = after;
        for script in scripts {
            queue = queue.with_script(script.id);
        }
        self.store.insert_queue(queue.clone());
        queue
    }
}

/// Wait up to five seconds for `cond`
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
