use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Broadcasts a stop request to workers and bounds how long they may take
/// to drain.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
    grace: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender, grace }
    }

    /// Receiver handed to each worker pool run.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        if !*self.sender.borrow() {
            info!("shutdown requested, workers will stop after their current task");
        }
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown on SIGINT.
    pub async fn trigger_on_ctrl_c(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => self.trigger(),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
    }

    /// Wait for `work` to finish, giving up after the grace period.
    pub async fn drain<F, T>(&self, work: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        match timeout(self.grace, work).await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(grace_ms = self.grace.as_millis() as u64, "workers did not drain in time");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_trigger() {
        let coordinator = ShutdownCoordinator::default();
        let mut rx = coordinator.subscribe();
        assert!(!*rx.borrow());

        coordinator.trigger();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert!(coordinator.drain(slow).await.is_none());
        assert_eq!(coordinator.drain(async { 7 }).await, Some(7));
    }
}
