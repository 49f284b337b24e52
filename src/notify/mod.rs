//! Outbound notification channel
//!
//! Units report progress and outcomes as [`Notification`]s addressed to a task
//! id (or to a well-known target such as `"Main"`). Delivery is fire and
//! forget: [`NotifyChannel`] logs delivery failures and never returns them.

pub mod sinks;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{trace, warn};

pub use sinks::{BroadcastNotifier, BufferingNotifier, LoggingNotifier, NullNotifier};

/// Well-known target for process-wide updates
pub const MAIN_TARGET: &str = "Main";
/// Well-known target for registry-level signals
pub const TASK_MANAGER_TARGET: &str = "TaskManager";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Progress snapshot or state push
    Update,
    /// Something the user should acknowledge, e.g. a countdown
    Message,
    /// Error / warning / info line
    Info,
    /// Lifecycle event such as `Accomplish`
    Signal,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Update => "Update",
            MessageKind::Message => "Message",
            MessageKind::Info => "Info",
            MessageKind::Signal => "Signal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: Value,
}

impl Notification {
    pub fn new(id: impl Into<String>, kind: MessageKind, data: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            data,
        }
    }
}

/// Transport for notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Fire-and-forget front end over a [`Notifier`]
#[derive(Clone)]
pub struct NotifyChannel {
    notifier: Arc<dyn Notifier>,
}

impl NotifyChannel {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullNotifier))
    }

    pub async fn send(&self, id: impl Into<String>, kind: MessageKind, data: Value) {
        let notification = Notification::new(id, kind, data);
        trace!(id = %notification.id, kind = %notification.kind, "Sending notification");
        let id = notification.id.clone();
        if let Err(e) = self.notifier.deliver(notification).await {
            warn!(id = %id, kind = %kind, error = %e, "Notification delivery failed");
        }
    }

    pub async fn update(&self, id: impl Into<String>, data: Value) {
        self.send(id, MessageKind::Update, data).await
    }

    pub async fn message(&self, id: impl Into<String>, data: Value) {
        self.send(id, MessageKind::Message, data).await
    }

    pub async fn signal(&self, id: impl Into<String>, data: Value) {
        self.send(id, MessageKind::Signal, data).await
    }

    pub async fn info_error(&self, id: impl Into<String>, text: impl Into<String>) {
        self.send(id, MessageKind::Info, json!({ "Error": text.into() }))
            .await
    }

    pub async fn info_warning(&self, id: impl Into<String>, text: impl Into<String>) {
        self.send(id, MessageKind::Info, json!({ "Warning": text.into() }))
            .await
    }
}

impl fmt::Debug for NotifyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyChannel").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn deliver(&self, _notification: Notification) -> anyhow::Result<()> {
            anyhow::bail!("socket closed")
        }
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let channel = NotifyChannel::new(Arc::new(FailingNotifier));
        channel.info_error("task", "boom").await;
    }

    #[tokio::test]
    async fn test_helpers_shape_payloads() {
        let buffer = Arc::new(BufferingNotifier::new());
        let channel = NotifyChannel::new(buffer.clone());
        channel.info_warning("t1", "locked").await;
        channel.signal("t1", json!({"Accomplish": "done"})).await;

        let sent = buffer.notifications();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, MessageKind::Info);
        assert_eq!(sent[0].data, json!({"Warning": "locked"}));
        assert_eq!(
            serde_json::to_value(&sent[1]).unwrap(),
            json!({"id": "t1", "type": "Signal", "data": {"Accomplish": "done"}})
        );
    }
}
