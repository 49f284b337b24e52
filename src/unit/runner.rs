use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, warn};

use super::accomplish::Accomplish;
use super::scope::{CrashPolicy, CrashReport, Scope};
use crate::core::errors::{DispatchError, Result};

/// Lifecycle of a supervised unit
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Idle = 0,
    Running = 1,
    Finalizing = 2,
    Done = 3,
}

impl UnitState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(UnitState::Idle),
            1 => Some(UnitState::Running),
            2 => Some(UnitState::Finalizing),
            3 => Some(UnitState::Done),
            _ => None,
        }
    }
}

/// How the body of a unit ended, as seen by its finisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Completed,
    Cancelled,
    Crashed,
}

/// A runnable piece of work with supervised lifecycle.
///
/// `main_task` runs inside the unit's cancellation scope and may be dropped
/// at any await point when the unit is cancelled. `final_task` always runs
/// afterwards, shielded from that cancellation. Failures of either are
/// handed to `on_crash`; only a body failure propagates into the scope.
#[async_trait]
pub trait Unit: Send + 'static {
    fn name(&self) -> String;

    async fn main_task(&mut self, ctx: &UnitContext) -> anyhow::Result<()>;

    async fn final_task(&mut self, exit: Exit) -> anyhow::Result<()>;

    async fn on_crash(&mut self, error: &anyhow::Error);
}

/// Access to the running unit's scope, only available while its body runs
pub struct UnitContext {
    unit: String,
    scope: Scope,
    token: CancellationToken,
    open: AtomicBool,
}

impl UnitContext {
    fn new(unit: String, scope: Scope, token: CancellationToken) -> Self {
        Self {
            unit,
            scope,
            token,
            open: AtomicBool::new(true),
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn unit_name(&self) -> &str {
        &self.unit
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this unit is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Start `unit` as a sibling in the caller's scope.
    pub fn spawn<U: Unit>(&self, unit: U) -> Result<UnitHandle> {
        if !self.open.load(Ordering::Acquire) || self.scope.is_cancelled() {
            return Err(DispatchError::ScopeClosed { unit: unit.name() });
        }
        let handle = UnitHandle::child(unit.name(), self.scope.clone());
        debug!(parent = %self.unit, child = %handle.name(), "Spawning unit");
        self.scope
            .spawn(run_unit(Box::new(unit), handle.inner.clone()));
        Ok(handle)
    }
}

/// Shared handle to a supervised unit
#[derive(Clone)]
pub struct UnitHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    root: bool,
    state: AtomicU8,
    token: CancellationToken,
    scope: Scope,
    accomplish: Accomplish,
    pending: Mutex<Option<Box<dyn Unit>>>,
}

impl HandleInner {
    fn set_state(&self, state: UnitState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl UnitHandle {
    /// Wrap `unit` as an idle root with its own scope.
    pub fn new<U: Unit>(unit: U, policy: CrashPolicy) -> Self {
        let name = unit.name();
        let scope = Scope::new(name.clone(), policy);
        let token = scope.token().clone();
        Self {
            inner: Arc::new(HandleInner {
                name,
                root: true,
                state: AtomicU8::new(UnitState::Idle as u8),
                token,
                scope,
                accomplish: Accomplish::new(),
                pending: Mutex::new(Some(Box::new(unit))),
            }),
        }
    }

    fn child(name: String, scope: Scope) -> Self {
        let token = scope.token().child_token();
        Self {
            inner: Arc::new(HandleInner {
                name,
                root: false,
                state: AtomicU8::new(UnitState::Running as u8),
                token,
                scope,
                accomplish: Accomplish::new(),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Start a root unit in a fresh scope and return immediately.
    pub fn execute(&self) -> Result<()> {
        if !self.inner.root {
            return Err(DispatchError::NotRoot {
                unit: self.inner.name.clone(),
            });
        }
        self.inner
            .state
            .compare_exchange(
                UnitState::Idle as u8,
                UnitState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| DispatchError::AlreadyStarted {
                unit: self.inner.name.clone(),
            })?;
        let unit = self
            .inner
            .pending
            .lock()
            .take()
            .ok_or_else(|| DispatchError::AlreadyStarted {
                unit: self.inner.name.clone(),
            })?;
        tokio::spawn(run_unit(unit, self.inner.clone()));
        Ok(())
    }

    /// Request cooperative cancellation. Returns `false` when there is
    /// nothing left to cancel.
    pub fn cancel(&self) -> bool {
        if self.state() != UnitState::Running || self.inner.token.is_cancelled() {
            return false;
        }
        debug!(unit = %self.inner.name, "Cancelling unit");
        self.inner.token.cancel();
        true
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.inner.state.load(Ordering::Acquire)).unwrap_or(UnitState::Done)
    }

    pub fn accomplish(&self) -> &Accomplish {
        &self.inner.accomplish
    }

    /// Wait for the accomplish signal
    pub async fn wait(&self) {
        self.inner.accomplish.wait().await
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn crash_reports(&self) -> Vec<CrashReport> {
        self.inner.scope.crashes()
    }
}

impl std::fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitHandle")
            .field("name", &self.inner.name)
            .field("root", &self.inner.root)
            .field("state", &self.state())
            .finish()
    }
}

enum BodyResult {
    Completed,
    Cancelled,
    Failed(anyhow::Error),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn report(unit: &mut Box<dyn Unit>, name: &str, error: &anyhow::Error) {
    if AssertUnwindSafe(unit.on_crash(error))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(unit = %name, "on_crash panicked");
    }
}

async fn run_unit(mut unit: Box<dyn Unit>, inner: Arc<HandleInner>) {
    let ctx = UnitContext::new(inner.name.clone(), inner.scope.clone(), inner.token.clone());
    debug!(unit = %inner.name, root = inner.root, "Unit running");

    let body = tokio::select! {
        biased;
        _ = inner.token.cancelled() => BodyResult::Cancelled,
        result = AssertUnwindSafe(unit.main_task(&ctx)).catch_unwind() => match result {
            Ok(Ok(())) => BodyResult::Completed,
            Ok(Err(e)) => BodyResult::Failed(e),
            Err(panic) => BodyResult::Failed(anyhow!("panicked: {}", panic_message(&*panic))),
        },
    };
    ctx.close();

    let mut exit = match body {
        BodyResult::Completed => Exit::Completed,
        BodyResult::Cancelled => Exit::Cancelled,
        BodyResult::Failed(_) => Exit::Crashed,
    };
    let crash = match body {
        BodyResult::Failed(error) => {
            error!(unit = %inner.name, error = %error, "Unit body crashed");
            report(&mut unit, &inner.name, &error).await;
            Some(error.to_string())
        }
        _ => None,
    };

    if inner.root {
        if let Some(message) = &crash {
            inner.scope.report_crash(&inner.name, message);
        }
        inner.scope.drain().await;
        if exit == Exit::Completed && inner.token.is_cancelled() {
            exit = Exit::Cancelled;
        }
    }

    inner.set_state(UnitState::Finalizing);
    match AssertUnwindSafe(unit.final_task(exit)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(unit = %inner.name, error = %error, "Finisher failed");
            report(&mut unit, &inner.name, &error).await;
        }
        Err(panic) => {
            let error = anyhow!("finisher panicked: {}", panic_message(&*panic));
            warn!(unit = %inner.name, error = %error, "Finisher failed");
            report(&mut unit, &inner.name, &error).await;
        }
    }
    inner.set_state(UnitState::Done);
    inner.accomplish.set();
    debug!(unit = %inner.name, exit = ?exit, "Unit done");

    if !inner.root {
        if let Some(message) = &crash {
            inner.scope.report_crash(&inner.name, message);
        }
    }
}
