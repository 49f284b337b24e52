use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::{Drivers, ScriptExecutor, ScriptRun};
use crate::core::errors::DispatchError;
use crate::notify::{NotifyChannel, MAIN_TARGET};
use crate::progress::{ScriptSeed, Status, TaskMode, TaskRecord, UserSeed};
use crate::store::{ConfigStore, PowerAction, ScriptLease};
use crate::unit::{Exit, Unit, UnitContext};

/// Root unit of one dispatch.
///
/// Resolves the target into an ordered script list, then admits each script
/// in order: deleted scripts end as `Error`, scripts locked by another
/// dispatch end as `Skipped`, and the rest get a [`ScriptExecutor`] spawned
/// into this unit's scope. Admission never waits for an executor to finish.
pub struct DispatchController {
    record: Arc<TaskRecord>,
    store: Arc<dyn ConfigStore>,
    drivers: Drivers,
    notify: NotifyChannel,
    // Lease taken by add_task for single-script targets
    admitted: Option<ScriptLease>,
}

impl DispatchController {
    pub fn new(
        record: Arc<TaskRecord>,
        store: Arc<dyn ConfigStore>,
        drivers: Drivers,
        notify: NotifyChannel,
        admitted: Option<ScriptLease>,
    ) -> Self {
        Self {
            record,
            store,
            drivers,
            notify,
            admitted,
        }
    }

    pub fn record(&self) -> &Arc<TaskRecord> {
        &self.record
    }

    fn task_key(&self) -> String {
        self.record.id().to_string()
    }

    /// Script ids this dispatch covers, in run order
    fn resolve(&self) -> Vec<Uuid> {
        if let Some(script_id) = self.record.script_id() {
            return vec![script_id];
        }
        self.record
            .queue_id()
            .and_then(|queue_id| self.store.queue_scripts(queue_id))
            .unwrap_or_default()
    }

    fn prepare(&self) -> Vec<Uuid> {
        let ids = self.resolve();
        let seeds = ids
            .iter()
            .map(|&script_id| ScriptSeed {
                script_id,
                name: self
                    .store
                    .script(script_id)
                    .map(|script| script.name)
                    .unwrap_or_else(|| script_id.to_string()),
                users: vec![UserSeed::placeholder()],
            })
            .collect();
        self.record.set_scripts(seeds);
        info!(
            task_id = %self.record.id(),
            scripts = ids.len(),
            "Dispatch prepared"
        );
        ids
    }

    /// Take the lock for `script_id`, reusing the one acquired at admission.
    fn lease_for(&mut self, script_id: Uuid) -> crate::core::errors::Result<ScriptLease> {
        if let Some(lease) = self.admitted.take() {
            if lease.script_id() == script_id {
                return Ok(lease);
            }
            self.admitted = Some(lease);
        }
        ScriptLease::acquire(self.store.clone(), script_id)
    }

    async fn request_power_action(&self) {
        if self.record.mode() != TaskMode::AutoProxy {
            return;
        }
        let Some(queue) = self
            .record
            .queue_id()
            .and_then(|queue_id| self.store.queue(queue_id))
        else {
            return;
        };
        let action = queue.after_accomplish;
        if action == PowerAction::NoAction {
            return;
        }
        if self.store.request_power_action(action) {
            info!(task_id = %self.record.id(), action = %action, "Power action requested");
            self.notify
                .update(MAIN_TARGET, json!({ "PowerSign": action.as_str() }))
                .await;
        } else {
            debug!(
                task_id = %self.record.id(),
                pending = %self.store.pending_power_action(),
                "Power action already pending"
            );
        }
    }
}

#[async_trait]
impl Unit for DispatchController {
    fn name(&self) -> String {
        format!("task:{}", self.record.id())
    }

    async fn main_task(&mut self, ctx: &UnitContext) -> anyhow::Result<()> {
        let ids = self.prepare();
        let handles = self.record.script_handles();
        info!(
            task_id = %self.record.id(),
            mode = ?self.record.mode(),
            "Dispatch started"
        );

        for (index, (script_id, handle)) in ids.iter().copied().zip(handles).enumerate() {
            self.record.set_current_index(index as isize)?;
            let name = handle
                .record()
                .map(|view| view.name)
                .unwrap_or_else(|| script_id.to_string());

            let Some(config) = self.store.script(script_id) else {
                handle.set_status(Status::Error)?;
                info!(script_id = %script_id, "Skipping deleted script");
                self.notify
                    .info_error(self.task_key(), format!("script {} was deleted", name))
                    .await;
                continue;
            };

            let lease = match self.lease_for(script_id) {
                Ok(lease) => lease,
                Err(DispatchError::AlreadyLocked { .. }) => {
                    handle.set_status(Status::Skipped)?;
                    info!(script_id = %script_id, "Skipping script locked by another dispatch");
                    self.notify
                        .info_warning(
                            self.task_key(),
                            format!("script {} is locked by another dispatch", name),
                        )
                        .await;
                    continue;
                }
                Err(e) => {
                    handle.set_status(Status::Error)?;
                    warn!(script_id = %script_id, error = %e, "Script could not be locked");
                    self.notify
                        .info_error(self.task_key(), format!("script {}: {}", name, e))
                        .await;
                    continue;
                }
            };

            handle.set_status(Status::Running)?;
            info!(script_id = %script_id, kind = config.kind.as_str(), "Script admitted");
            let run = ScriptRun {
                task_id: self.record.id(),
                mode: self.record.mode(),
                target_user: self.record.user_id(),
                script: handle,
                config: Arc::new(config),
                notify: self.notify.clone(),
            };
            let driver = self.drivers.for_kind(run.config.kind);
            ctx.spawn(ScriptExecutor::new(run, driver, Some(lease)))?;
        }

        self.record.set_current_index(ids.len() as isize)?;
        Ok(())
    }

    async fn final_task(&mut self, exit: Exit) -> anyhow::Result<()> {
        if let Some(lease) = self.admitted.take() {
            if let Err(e) = lease.release() {
                error!(task_id = %self.record.id(), error = %e, "Failed to release script lock");
            }
        }

        info!(task_id = %self.record.id(), exit = ?exit, "Dispatch finished");
        self.notify
            .signal(self.task_key(), json!({ "Accomplish": self.record.result() }))
            .await;
        self.request_power_action().await;
        Ok(())
    }

    async fn on_crash(&mut self, error: &anyhow::Error) {
        error!(task_id = %self.record.id(), error = %error, "Dispatch crashed");
        self.notify
            .info_error(self.task_key(), format!("task crashed: {}", error))
            .await;
    }
}
