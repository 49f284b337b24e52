use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::store::PowerAction;

/// Power / system pipeline that runs once every dispatch has finished
#[async_trait]
pub trait SystemActions: Send + Sync {
    /// Start the countdown for `action`. Returns once the task is scheduled,
    /// not when the action runs.
    async fn start_power_task(&self, action: PowerAction, countdown: Duration)
        -> anyhow::Result<()>;
}

/// Records the request in the log and does nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSystemActions;

#[async_trait]
impl SystemActions for LoggingSystemActions {
    async fn start_power_task(
        &self,
        action: PowerAction,
        countdown: Duration,
    ) -> anyhow::Result<()> {
        info!(
            action = %action,
            countdown_secs = countdown.as_secs(),
            "Power task requested"
        );
        Ok(())
    }
}
