use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::core::errors::DispatchError;

/// What a crash inside a scope does to the other units in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashPolicy {
    /// Cancel every unit in the scope, root included
    #[default]
    CancelScope,
    /// Record the crash and let siblings run on
    Isolate,
}

/// A crash that crossed into a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub unit: String,
    pub message: String,
}

impl CrashReport {
    pub fn to_error(&self) -> DispatchError {
        DispatchError::crashed(&self.unit, &self.message)
    }
}

/// Cancellation scope shared by a root unit and everything spawned under it.
///
/// Cancelling the scope token cancels every unit token derived from it.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    name: String,
    token: CancellationToken,
    tracker: TaskTracker,
    policy: CrashPolicy,
    crashes: Mutex<Vec<CrashReport>>,
}

impl Scope {
    pub(crate) fn new(name: impl Into<String>, policy: CrashPolicy) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                policy,
                crashes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn policy(&self) -> CrashPolicy {
        self.inner.policy
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Number of spawned units that have not finished yet
    pub fn active_units(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn crashes(&self) -> Vec<CrashReport> {
        self.inner.crashes.lock().clone()
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(future);
    }

    pub(crate) fn report_crash(&self, unit: &str, message: &str) {
        self.inner.crashes.lock().push(CrashReport {
            unit: unit.to_string(),
            message: message.to_string(),
        });
        if self.inner.policy == CrashPolicy::CancelScope && !self.is_cancelled() {
            warn!(scope = %self.inner.name, unit = %unit, "Crash cancels scope");
            self.inner.token.cancel();
        }
    }

    /// Wait for every unit spawned into the scope, including ones spawned
    /// while waiting.
    pub(crate) async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("cancelled", &self.is_cancelled())
            .field("active_units", &self.active_units())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorCategory;

    #[tokio::test]
    async fn test_cancel_policy_cancels_token() {
        let scope = Scope::new("root", CrashPolicy::CancelScope);
        let child = scope.token().child_token();
        scope.report_crash("worker", "boom");
        assert!(scope.is_cancelled());
        assert!(child.is_cancelled());
        assert_eq!(scope.crashes().len(), 1);
        let error = scope.crashes()[0].to_error();
        assert_eq!(error.category(), ErrorCategory::Crash);
        assert_eq!(error.to_string(), "Unit worker crashed: boom");
    }

    #[tokio::test]
    async fn test_isolate_policy_keeps_running() {
        let scope = Scope::new("root", CrashPolicy::Isolate);
        scope.report_crash("worker", "boom");
        assert!(!scope.is_cancelled());
        assert_eq!(scope.crashes()[0].unit, "worker");
    }

    #[tokio::test]
    async fn test_drain_waits_for_spawned() {
        let scope = Scope::new("root", CrashPolicy::Isolate);
        let (tx, rx) = tokio::sync::oneshot::channel();
        scope.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = tx.send(());
        });
        scope.drain().await;
        assert!(rx.await.is_ok());
        assert_eq!(scope.active_units(), 0);
    }
}
