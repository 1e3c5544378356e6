//! Periodic playback sync over data channels

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::SessionRegistry;

/// Background task pushing the playback position to every client
///
/// Holds only a weak registry reference; the task exits on [`stop`] or
/// once the registry is dropped.
///
/// [`stop`]: SyncBroadcaster::stop
pub struct SyncBroadcaster {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncBroadcaster {
    pub fn spawn(registry: Weak<SessionRegistry>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.tick_sync().await;
            }

            tracing::debug!("Sync broadcaster stopped");
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Sync broadcaster started");

        Self { stop_tx, handle }
    }

    /// Stop the task and wait for it to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Sync broadcaster panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exits_without_registry() {
        let broadcaster = SyncBroadcaster::spawn(Weak::new(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(broadcaster.is_finished());
        broadcaster.stop().await;
    }
}
