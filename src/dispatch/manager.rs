use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::controller::DispatchController;
use super::executor::Drivers;
use super::system::{LoggingSystemActions, SystemActions};
use crate::core::config::SchedulerConfig;
use crate::core::errors::{DispatchError, Result};
use crate::notify::{LoggingNotifier, Notifier, NotifyChannel, MAIN_TARGET, TASK_MANAGER_TARGET};
use crate::progress::{ChangeHook, ChangeRecord, TaskMode, TaskRecord, TaskTarget};
use crate::store::{ConfigStore, ScriptConfig, ScriptLease};
use crate::unit::{Accomplish, UnitHandle};

/// Target accepted by [`TaskManager::stop_task`] to stop every dispatch
pub const STOP_ALL: &str = "ALL";

/// Pushes the task snapshot, and the current script's progress line, on
/// every batch of changes.
pub struct SnapshotPublisher {
    notify: NotifyChannel,
}

impl SnapshotPublisher {
    pub fn new(notify: NotifyChannel) -> Self {
        Self { notify }
    }
}

#[async_trait]
impl ChangeHook for SnapshotPublisher {
    async fn on_change(&self, record: &TaskRecord, _batch: &[ChangeRecord]) {
        let id = record.id().to_string();
        self.notify
            .update(id.clone(), json!({ "task_info": record.snapshot() }))
            .await;
        if let Some(log) = record.current_log() {
            self.notify.update(id, json!({ "log": log })).await;
        }
    }
}

#[derive(Clone)]
struct TaskEntry {
    record: Arc<TaskRecord>,
    handle: UnitHandle,
    stopping: Arc<AtomicBool>,
    // Set once the reaper has removed the entry
    reaped: Accomplish,
}

struct ManagerInner {
    store: Arc<dyn ConfigStore>,
    drivers: Drivers,
    notify: NotifyChannel,
    system: Arc<dyn SystemActions>,
    config: SchedulerConfig,
    entries: Mutex<IndexMap<Uuid, TaskEntry>>,
}

/// Registry of in-flight dispatches and the public entry point of the crate.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn builder() -> TaskManagerBuilder {
        TaskManagerBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Admit a dispatch for a queue, a script, or (configuration runs only)
    /// a single user. The task is registered and running when this returns.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_task(&self, mode: TaskMode, target: &str) -> Result<Uuid> {
        let uid = Uuid::parse_str(target).map_err(|_| DispatchError::invalid_id(target))?;
        let (task_target, script) = self.resolve(mode, uid)?;

        let lease = match &script {
            Some(script) => Some(
                ScriptLease::acquire(self.inner.store.clone(), script.id).map_err(|e| match e {
                    DispatchError::AlreadyLocked { script_id } => DispatchError::ScriptLocked {
                        script_id,
                        name: script.name.clone(),
                    },
                    other => other,
                })?,
            ),
            None => None,
        };

        let task_id = Uuid::new_v4();
        let (record, feed) = TaskRecord::new(task_id, mode, task_target);
        let controller = DispatchController::new(
            record.clone(),
            self.inner.store.clone(),
            self.inner.drivers.clone(),
            self.inner.notify.clone(),
            lease,
        );
        let handle = UnitHandle::new(controller, self.inner.config.crash_policy);
        let entry = TaskEntry {
            record: record.clone(),
            handle: handle.clone(),
            stopping: Arc::new(AtomicBool::new(false)),
            reaped: Accomplish::new(),
        };

        info!(task_id = %task_id, mode = ?mode, target = %uid, "Task created");
        self.inner.entries.lock().insert(task_id, entry.clone());
        if let Err(e) = handle.execute() {
            self.inner.entries.lock().shift_remove(&task_id);
            return Err(e);
        }

        let hook: Arc<dyn ChangeHook> = Arc::new(SnapshotPublisher::new(self.inner.notify.clone()));
        let flush = CancellationToken::new();
        let pump = feed.pump(Arc::downgrade(&record), hook, flush.clone());
        tokio::spawn(self.clone().reap(task_id, entry, pump, flush));

        Ok(task_id)
    }

    fn resolve(&self, mode: TaskMode, uid: Uuid) -> Result<(TaskTarget, Option<ScriptConfig>)> {
        let store = &self.inner.store;
        if mode == TaskMode::ScriptConfig {
            if let Some(script) = store.script(uid) {
                let target = TaskTarget {
                    script_id: Some(script.id),
                    ..TaskTarget::default()
                };
                return Ok((target, Some(script)));
            }
            if let Some(script) = store.script_owning_user(uid) {
                let target = TaskTarget {
                    script_id: Some(script.id),
                    user_id: Some(uid),
                    ..TaskTarget::default()
                };
                return Ok((target, Some(script)));
            }
        } else if store.queue(uid).is_some() {
            let target = TaskTarget {
                queue_id: Some(uid),
                ..TaskTarget::default()
            };
            return Ok((target, None));
        } else if let Some(script) = store.script(uid) {
            let target = TaskTarget {
                script_id: Some(script.id),
                ..TaskTarget::default()
            };
            return Ok((target, Some(script)));
        }
        Err(DispatchError::target_not_found(uid.to_string()))
    }

    async fn reap(
        self,
        task_id: Uuid,
        entry: TaskEntry,
        pump: JoinHandle<()>,
        flush: CancellationToken,
    ) {
        entry.handle.wait().await;
        for report in entry.handle.crash_reports() {
            let error = report.to_error();
            warn!(task_id = %task_id, error = %error, "Task ended after a crash");
        }
        // Publish the final snapshot before the task leaves the registry
        flush.cancel();
        if let Err(e) = pump.await {
            warn!(task_id = %task_id, error = %e, "Change pump ended abnormally");
        }
        let power_enabled = entry.record.mode() != TaskMode::ScriptConfig;
        let now_empty = {
            let mut entries = self.inner.entries.lock();
            entries.shift_remove(&task_id);
            entries.is_empty()
        };
        entry.reaped.set();
        debug!(task_id = %task_id, remaining_empty = now_empty, "Task reaped");

        if power_enabled && now_empty {
            self.run_power_pipeline().await;
        }
    }

    async fn run_power_pipeline(&self) {
        let action = self.inner.store.take_power_action();
        if !action.is_action() {
            return;
        }
        info!(action = %action, "All tasks finished, starting power action");
        self.inner
            .notify
            .message(
                MAIN_TARGET,
                json!({
                    "type": "Countdown",
                    "title": format!("{} countdown", action.label()),
                    "message": format!(
                        "The application will {} when the countdown ends",
                        action.label()
                    ),
                }),
            )
            .await;
        let countdown = Duration::from_secs(self.inner.config.power_countdown_secs);
        if let Err(e) = self.inner.system.start_power_task(action, countdown).await {
            error!(action = %action, error = %e, "Power task failed to start");
        }
    }

    /// Stop one task by id, or every task with [`STOP_ALL`]. Returns once the
    /// stopped tasks have finished and left the registry.
    pub async fn stop_task(&self, target: &str) -> Result<()> {
        info!(target = %target, "Stopping task");
        if target == STOP_ALL {
            let entries: Vec<_> = self.inner.entries.lock().values().cloned().collect();
            for entry in &entries {
                if !entry.stopping.swap(true, Ordering::AcqRel) {
                    entry.handle.cancel();
                }
            }
            for entry in entries {
                entry.handle.wait().await;
                entry.reaped.wait().await;
            }
            return Ok(());
        }

        let uid = Uuid::parse_str(target).map_err(|_| DispatchError::TaskNotFound {
            task_id: target.to_string(),
        })?;
        let entry = self
            .inner
            .entries
            .lock()
            .get(&uid)
            .cloned()
            .ok_or_else(|| DispatchError::TaskNotFound {
                task_id: target.to_string(),
            })?;
        if entry.stopping.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyStopping { task_id: uid });
        }
        entry.handle.cancel();
        debug!(task_id = %uid, "Waiting for task to finish");
        entry.handle.wait().await;
        entry.reaped.wait().await;
        info!(task_id = %uid, "Task stopped");
        Ok(())
    }

    /// Admit every queue flagged to run at startup. One failed admission does
    /// not prevent the others.
    pub async fn start_startup_queue(&self) -> Vec<Uuid> {
        info!("Starting startup queues");
        let mut started = Vec::new();
        for queue in self.inner.store.queues() {
            if !queue.startup_enabled {
                continue;
            }
            match self.add_task(TaskMode::AutoProxy, &queue.id.to_string()) {
                Ok(task_id) => {
                    info!(queue_id = %queue.id, task_id = %task_id, "Startup queue admitted");
                    self.inner
                        .notify
                        .signal(
                            TASK_MANAGER_TARGET,
                            json!({
                                "newTask": task_id.to_string(),
                                "queueId": queue.id.to_string(),
                                "taskName": format!("queue - {}", queue.name),
                                "taskType": "startup run",
                            }),
                        )
                        .await;
                    started.push(task_id);
                }
                Err(e) => {
                    warn!(queue_id = %queue.id, error = %e, "Startup queue not admitted");
                    self.inner
                        .notify
                        .info_error(
                            TASK_MANAGER_TARGET,
                            format!("startup queue {} not started: {}", queue.name, e),
                        )
                        .await;
                }
            }
        }
        started
    }

    /// Records of every registered task, in admission order
    pub fn tasks(&self) -> IndexMap<Uuid, Arc<TaskRecord>> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.record.clone()))
            .collect()
    }

    pub fn task(&self, task_id: Uuid) -> Option<Arc<TaskRecord>> {
        self.inner
            .entries
            .lock()
            .get(&task_id)
            .map(|entry| entry.record.clone())
    }

    /// Completion signal of a registered task's controller
    pub fn accomplish(&self, task_id: Uuid) -> Option<Accomplish> {
        self.inner
            .entries
            .lock()
            .get(&task_id)
            .map(|entry| entry.handle.accomplish().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Explicit wiring of a [`TaskManager`]
pub struct TaskManagerBuilder {
    store: Option<Arc<dyn ConfigStore>>,
    drivers: Option<Drivers>,
    notifier: Option<Arc<dyn Notifier>>,
    system: Option<Arc<dyn SystemActions>>,
    config: SchedulerConfig,
}

impl TaskManagerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            drivers: None,
            notifier: None,
            system: None,
            config: SchedulerConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn drivers(mut self, drivers: Drivers) -> Self {
        self.drivers = Some(drivers);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn system_actions(mut self, system: Arc<dyn SystemActions>) -> Self {
        self.system = Some(system);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<TaskManager> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| DispatchError::configuration("a config store is required"))?;
        let drivers = self
            .drivers
            .ok_or_else(|| DispatchError::configuration("script drivers are required"))?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LoggingNotifier) as Arc<dyn Notifier>);
        let system = self
            .system
            .unwrap_or_else(|| Arc::new(LoggingSystemActions) as Arc<dyn SystemActions>);

        Ok(TaskManager {
            inner: Arc::new(ManagerInner {
                store,
                drivers,
                notify: NotifyChannel::new(notifier),
                system,
                config: self.config,
                entries: Mutex::new(IndexMap::new()),
            }),
        })
    }
}

impl Default for TaskManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
