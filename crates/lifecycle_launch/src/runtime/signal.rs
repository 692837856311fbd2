//! Process-group shutdown signal

use std::sync::Arc;
use tokio::sync::watch;

/// One-shot shutdown flag shared by the signal handler and the run loop.
///
/// However often it is triggered, observers see a single transition from
/// "running" to "shutting down".
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal; returns `true` only for the first call
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been raised
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Route SIGINT/SIGTERM to this signal
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            if signal.trigger() {
                log::info!("Received shutdown signal, initiating shutdown...");
            } else {
                log::debug!("Shutdown already in progress");
            }
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_trigger_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.clone().is_triggered());
    }

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // Already raised: returns immediately
        signal.wait().await;
    }
}
