use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use super::tree::TaskRecord;

/// Which observed field a mutation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Scripts,
    TaskIndex,
    ScriptName,
    ScriptStatus,
    ScriptIndex,
    ScriptLog,
    Users,
    UserName,
    UserStatus,
    UserLog,
}

/// One queued mutation of a task's progress tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub task_id: Uuid,
    pub script: Option<usize>,
    pub kind: ChangeKind,
}

/// The root `on_change` hook, supplied by whoever composes the tree
#[async_trait]
pub trait ChangeHook: Send + Sync {
    async fn on_change(&self, record: &TaskRecord, batch: &[ChangeRecord]);
}

/// Receiving end of a task's change queue
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<ChangeRecord>,
}

impl ChangeFeed {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChangeRecord>) -> Self {
        Self { rx }
    }

    /// Wait for the next change and coalesce everything already queued
    /// behind it. `None` once the record has been released.
    pub async fn next_batch(&mut self) -> Option<Vec<ChangeRecord>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(change) = self.rx.try_recv() {
            batch.push(change);
        }
        Some(batch)
    }

    /// Flush whatever is queued right now without waiting
    pub fn drain_pending(&mut self) -> Vec<ChangeRecord> {
        let mut batch = Vec::new();
        while let Ok(change) = self.rx.try_recv() {
            batch.push(change);
        }
        batch
    }

    /// Run the drain loop against `hook` until the record goes away or
    /// `stop` fires. Changes still queued when `stop` fires are flushed as
    /// one last batch.
    pub fn pump(
        mut self,
        record: Weak<TaskRecord>,
        hook: Arc<dyn ChangeHook>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    biased;
                    batch = self.next_batch() => match batch {
                        Some(batch) => batch,
                        None => break,
                    },
                    _ = stop.cancelled() => {
                        let rest = self.drain_pending();
                        if let (false, Some(record)) = (rest.is_empty(), record.upgrade()) {
                            hook.on_change(&record, &rest).await;
                        }
                        break;
                    }
                };
                let Some(record) = record.upgrade() else {
                    break;
                };
                trace!(task_id = %record.id(), changes = batch.len(), "Publishing changes");
                hook.on_change(&record, &batch).await;
            }
        })
    }
}
