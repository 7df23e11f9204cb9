//! Graceful shutdown management
//!
//! [`StopSignal`] is a latching, cloneable stop flag that sleeping tasks can
//! wait on. The process-wide [`ShutdownManager`] owns one; every monitor
//! task owns another so it can be cancelled on its own.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Latching stop flag. Once triggered it stays triggered.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is triggered
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless triggered first.
    /// Returns `true` if the full duration elapsed without a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_triggered(),
            _ = self.wait() => false,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Manages graceful shutdown for the long-running engine
pub struct ShutdownManager {
    signal: StopSignal,
}

impl ShutdownManager {
    /// Create a new shutdown manager with running state
    pub fn new() -> Self {
        Self {
            signal: StopSignal::new(),
        }
    }

    /// Spawn a Ctrl+C signal handler that triggers shutdown
    pub fn spawn_signal_handler(&self) {
        let stop = self.signal.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("");
                info!("Received shutdown signal (Ctrl+C)");
                info!("Shutting down gracefully...");
                stop.trigger();
            }
        });
    }

    /// Check if the process should continue running
    pub fn is_running(&self) -> bool {
        !self.signal.is_triggered()
    }

    /// Request shutdown from inside the process (emergency stop)
    pub fn trigger(&self) {
        self.signal.trigger();
    }

    /// Get a clone of the shutdown signal for passing to async tasks
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_sleeper() {
        let stop = StopSignal::new();
        let sleeper = stop.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(3600)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();

        let completed = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
        assert!(stop.is_triggered());
    }

    #[tokio::test]
    async fn test_sleep_completes_when_not_triggered() {
        let stop = StopSignal::new();
        assert!(stop.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_already_triggered_returns_immediately() {
        let manager = ShutdownManager::new();
        assert!(manager.is_running());
        manager.trigger();
        assert!(!manager.is_running());

        tokio::time::timeout(Duration::from_secs(1), manager.signal().wait())
            .await
            .unwrap();
    }
}
