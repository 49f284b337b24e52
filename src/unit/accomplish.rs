use std::sync::Arc;

use tokio::sync::watch;

/// One-shot "fully finished" signal.
///
/// Set exactly once, after a unit's finisher has run. Any number of waiters
/// may observe it, before or after it fires.
#[derive(Debug, Clone)]
pub struct Accomplish {
    tx: Arc<watch::Sender<bool>>,
}

impl Accomplish {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub(crate) fn set(&self) -> bool {
        let mut fired = false;
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                fired = true;
                true
            }
        });
        fired
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal has fired; returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Accomplish {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_once() {
        let signal = Accomplish::new();
        assert!(!signal.is_set());
        assert!(signal.set());
        assert!(!signal.set());
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_waiters_before_and_after() {
        let signal = Accomplish::new();
        let early = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set();
        early.await.unwrap();

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_millis(50), signal.wait())
                .await
                .expect("late waiter should return immediately");
        }
    }
}
