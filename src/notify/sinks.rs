use async_broadcast::{InactiveReceiver, Receiver, Sender, TrySendError};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use super::{MessageKind, Notification, Notifier};
use crate::core::config::SchedulerConfig;

/// Writes every notification to the tracing output
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            id = %notification.id,
            kind = %notification.kind,
            data = %notification.data,
            "Notification"
        );
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn deliver(&self, _notification: Notification) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every notification in memory, in delivery order
#[derive(Debug, Default)]
pub struct BufferingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl BufferingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn of_kind(&self, kind: MessageKind) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    pub fn for_id(&self, id: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.id == id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Notifier for BufferingNotifier {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().push(notification);
        Ok(())
    }
}

/// Fans notifications out to any number of subscribers. Slow subscribers
/// lose the oldest messages.
pub struct BroadcastNotifier {
    tx: Sender<Notification>,
    // Keeps the channel open while nobody is subscribed
    _keepalive: InactiveReceiver<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (mut tx, rx) = async_broadcast::broadcast(capacity.max(1));
        tx.set_overflow(true);
        tx.set_await_active(false);
        Self {
            tx,
            _keepalive: rx.deactivate(),
        }
    }

    /// Sized by `broadcast_capacity`
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.broadcast_capacity)
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.tx.new_receiver()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for BroadcastNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastNotifier")
            .field("capacity", &self.tx.capacity())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()> {
        match self.tx.try_broadcast(notification) {
            Ok(_) | Err(TrySendError::Inactive(_)) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow::anyhow!("broadcast channel full")),
            Err(TrySendError::Closed(_)) => Err(anyhow::anyhow!("broadcast channel closed")),
        }
    }
}
