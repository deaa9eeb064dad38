// Notification bus.
//
// One event per successfully published revision, one per unrecoverable
// failure. The engine does not care who listens: the daemon binary
// attaches a logging consumer, and dashboard/analytics collaborators can
// subscribe the same way.

use confsync_common::types::SyncEvent;
use tokio::sync::broadcast;
use tracing::{error, info};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

/// Logging consumer: turns bus events into structured log lines until the
/// bus is dropped.
pub async fn log_events(mut rx: broadcast::Receiver<SyncEvent>) {
    loop {
        match rx.recv().await {
            Ok(SyncEvent::Published { source, revision, author, .. }) => {
                info!(%source, revision, %author, "revision published");
            }
            Ok(SyncEvent::Failure { source, revision, message }) => {
                error!(%source, ?revision, %message, "synchronization failure");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                error!(missed, "event log consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
