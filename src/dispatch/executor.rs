use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::notify::NotifyChannel;
use crate::progress::{ScriptHandle, Status, TaskMode, UserHandle, UserSeed};
use crate::store::{ScriptConfig, ScriptKind, ScriptLease};
use crate::unit::{Exit, Unit, UnitContext};

/// Attempt status written when a run is stopped
pub const STOPPED_BY_USER: &str = "stopped by user";

/// What driving one user produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Done,
    Skipped,
    Error(String),
}

/// Everything a driver may read about the script it is driving
#[derive(Debug, Clone)]
pub struct ScriptRun {
    pub task_id: Uuid,
    pub mode: TaskMode,
    /// Set when a configuration run targets one user
    pub target_user: Option<Uuid>,
    pub config: Arc<ScriptConfig>,
    pub script: ScriptHandle,
    pub notify: NotifyChannel,
}

/// Per-kind automation backend.
///
/// Only `drive_user` is required. An `Err` from `drive_user` or `finish` is a
/// crash, while `UserOutcome::Error` is an ordinary failed user.
#[async_trait]
pub trait ScriptDriver: Send + Sync {
    /// Pre-flight. `Err(reason)` marks the script as failed without driving it.
    async fn check(&self, _run: &ScriptRun) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Users to drive, in order
    fn load_users(&self, run: &ScriptRun) -> Vec<UserSeed> {
        match run.mode {
            TaskMode::ScriptConfig => {
                let seed = run
                    .target_user
                    .and_then(|id| run.config.user(id))
                    .map(|user| UserSeed::new(user.id.to_string(), user.name.clone()))
                    .unwrap_or_else(|| UserSeed::new("Default", "Default"));
                vec![seed]
            }
            TaskMode::AutoProxy | TaskMode::ManualReview => run
                .config
                .users
                .iter()
                .filter(|user| user.runnable())
                .map(|user| UserSeed::new(user.id.to_string(), user.name.clone()))
                .collect(),
        }
    }

    async fn drive_user(&self, run: &ScriptRun, user: &UserHandle)
        -> anyhow::Result<UserOutcome>;

    /// Teardown, run from the executor's finisher
    async fn finish(&self, _run: &ScriptRun) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One driver per script kind
#[derive(Clone)]
pub struct Drivers {
    maa: Arc<dyn ScriptDriver>,
    general: Arc<dyn ScriptDriver>,
}

impl Drivers {
    pub fn new(maa: Arc<dyn ScriptDriver>, general: Arc<dyn ScriptDriver>) -> Self {
        Self { maa, general }
    }

    /// The same driver for every kind
    pub fn uniform(driver: Arc<dyn ScriptDriver>) -> Self {
        Self {
            maa: driver.clone(),
            general: driver,
        }
    }

    pub fn for_kind(&self, kind: ScriptKind) -> Arc<dyn ScriptDriver> {
        match kind {
            ScriptKind::Maa => self.maa.clone(),
            ScriptKind::General => self.general.clone(),
        }
    }
}

impl std::fmt::Debug for Drivers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drivers").finish_non_exhaustive()
    }
}

/// Drives one script: loads its users and runs them one after another as
/// [`UserAction`] units in the dispatch scope.
pub struct ScriptExecutor {
    run: ScriptRun,
    driver: Arc<dyn ScriptDriver>,
    lease: Option<ScriptLease>,
    check_failed: bool,
}

impl ScriptExecutor {
    pub fn new(run: ScriptRun, driver: Arc<dyn ScriptDriver>, lease: Option<ScriptLease>) -> Self {
        Self {
            run,
            driver,
            lease,
            check_failed: false,
        }
    }

    async fn report(&self) {
        if self.run.mode == TaskMode::ScriptConfig {
            return;
        }
        let Some(record) = self.run.script.record() else {
            return;
        };
        let message = format!(
            "completed users: {}; uncompleted users: {}\n\n{}",
            record.completed_users(),
            record.uncompleted_users(),
            record.result()
        );
        self.run
            .notify
            .message(
                self.run.task_id.to_string(),
                json!({
                    "type": "Report",
                    "title": format!("{} {} report", record.name, self.run.mode),
                    "message": message,
                }),
            )
            .await;
    }
}

#[async_trait]
impl Unit for ScriptExecutor {
    fn name(&self) -> String {
        format!("script:{}", self.run.config.id)
    }

    async fn main_task(&mut self, ctx: &UnitContext) -> anyhow::Result<()> {
        let script = &self.run.script;

        if let Err(reason) = self.driver.check(&self.run).await {
            warn!(script_id = %self.run.config.id, reason = %reason, "Script check failed");
            self.check_failed = true;
            script.set_log(reason.clone());
            self.run
                .notify
                .info_error(self.run.task_id.to_string(), reason)
                .await;
            return Ok(());
        }

        let users = script.replace_users(self.driver.load_users(&self.run));
        info!(
            task_id = %self.run.task_id,
            script_id = %self.run.config.id,
            users = users.len(),
            "Script started"
        );

        for (index, user) in users.iter().enumerate() {
            script.set_current_index(index as isize)?;
            if let Some(view) = user.record() {
                script.set_log(format!("running user {}", view.name));
            }
            let action = UserAction::new(self.run.clone(), self.driver.clone(), user.clone());
            let handle = ctx.spawn(action)?;
            handle.wait().await;
        }
        script.set_current_index(users.len() as isize)?;
        Ok(())
    }

    async fn final_task(&mut self, exit: Exit) -> anyhow::Result<()> {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = lease.release() {
                error!(
                    script_id = %self.run.config.id,
                    error = %e,
                    "Failed to release script lock"
                );
            }
        }

        let status = match exit {
            Exit::Completed if !self.check_failed => Status::Done,
            _ => Status::Error,
        };
        if exit == Exit::Cancelled {
            self.run.script.set_log(STOPPED_BY_USER);
        }
        if let Err(e) = self.run.script.set_status(status) {
            debug!(script_id = %self.run.config.id, error = %e, "Script status unchanged");
        }

        self.report().await;
        info!(
            task_id = %self.run.task_id,
            script_id = %self.run.config.id,
            exit = ?exit,
            "Script finished"
        );

        if !self.check_failed {
            self.driver.finish(&self.run).await?;
        }
        Ok(())
    }

    async fn on_crash(&mut self, error: &anyhow::Error) {
        self.run
            .notify
            .info_error(
                self.run.task_id.to_string(),
                format!("script {} crashed: {}", self.run.config.name, error),
            )
            .await;
    }
}

/// Drives a single user of a script
pub struct UserAction {
    run: ScriptRun,
    driver: Arc<dyn ScriptDriver>,
    user: UserHandle,
    outcome: Option<UserOutcome>,
}

impl UserAction {
    pub fn new(run: ScriptRun, driver: Arc<dyn ScriptDriver>, user: UserHandle) -> Self {
        Self {
            run,
            driver,
            user,
            outcome: None,
        }
    }
}

#[async_trait]
impl Unit for UserAction {
    fn name(&self) -> String {
        let user = self
            .user
            .record()
            .map(|view| view.user_id)
            .unwrap_or_default();
        format!("user:{}:{}", self.run.config.id, user)
    }

    async fn main_task(&mut self, _ctx: &UnitContext) -> anyhow::Result<()> {
        self.user.set_status(Status::Running)?;
        let outcome = self.driver.drive_user(&self.run, &self.user).await?;
        self.outcome = Some(outcome);
        Ok(())
    }

    async fn final_task(&mut self, exit: Exit) -> anyhow::Result<()> {
        let status = match (exit, self.outcome.take()) {
            (Exit::Completed, Some(UserOutcome::Done)) => Status::Done,
            (Exit::Completed, Some(UserOutcome::Skipped)) => Status::Skipped,
            (Exit::Completed, Some(UserOutcome::Error(reason))) => {
                self.user.interrupt_attempt(reason);
                Status::Error
            }
            (Exit::Cancelled, _) => {
                self.user.interrupt_attempt(STOPPED_BY_USER);
                Status::Error
            }
            _ => {
                self.user.interrupt_attempt("crashed");
                Status::Error
            }
        };
        if let Err(e) = self.user.set_status(status) {
            debug!(error = %e, "User status unchanged");
        }
        Ok(())
    }

    async fn on_crash(&mut self, error: &anyhow::Error) {
        let user = self
            .user
            .record()
            .map(|view| view.name)
            .unwrap_or_else(|| "unknown".to_string());
        warn!(
            task_id = %self.run.task_id,
            script_id = %self.run.config.id,
            user = %user,
            error = %error,
            "User action crashed"
        );
        self.run
            .notify
            .info_error(
                self.run.task_id.to_string(),
                format!("{} - user {} crashed: {}", self.run.config.name, user, error),
            )
            .await;
    }
}
