// Synchronization orchestrator: the per-source polling loop.
//
// Each monitored source runs one timer-driven task. On every tick it reads
// the cursor, asks the upstream for the history starting just past it, and
// publishes each new revision in strictly ascending order: prepare the
// working copy, wipe and repopulate it from a scratch dump of that exact
// revision, commit and push, advance the cursor, emit an event. A failure
// anywhere aborts the rest of the batch, since a later revision may depend on an
// earlier one being committed first, so skipping ahead is never allowed.
// The same starting point is retried on the next tick (at-least-once).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use confsync_common::report::{parse_report, ReportError};
use confsync_common::types::{RevisionRecord, SyncEvent};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::cursor::{CursorError, CursorStore};
use crate::events::EventBus;
use crate::git::{CommandExecutor, GitError, GitPublisher};
use crate::platform::{PlatformError, UpstreamClient};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("failed to clear destination directory: {0}")]
    ClearDestination(std::io::Error),
    #[error("internal task failure: {0}")]
    Internal(String),
}

/// A failed tick, with the revision that was in flight when known.
#[derive(Debug)]
pub struct TickFailure {
    pub revision: Option<u64>,
    pub error: SyncError,
}

// ── Destination lock registry ──────────────────────────────────────

/// Per-destination publish locks.
///
/// Only one publish may run against a given destination directory at a
/// time, across ticks and across sources that happen to share a
/// destination. Discovery is deliberately not serialized here.
#[derive(Debug, Default)]
pub struct DestinationLocks {
    inner: StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl DestinationLocks {
    pub fn lock_for(&self, destination: &Path) -> Arc<AsyncMutex<()>> {
        // Canonicalize so two spellings of the same directory share a lock.
        let key = destination.canonicalize().unwrap_or_else(|_| destination.to_path_buf());
        self.inner
            .lock()
            .expect("destination lock registry poisoned")
            .entry(key)
            .or_default()
            .clone()
    }
}

// ── Per-source syncer ──────────────────────────────────────────────

pub struct SourceSyncer<C, E = crate::git::ProcessCommandExecutor> {
    source: SourceConfig,
    client: Arc<C>,
    cursor: Arc<CursorStore>,
    publisher: GitPublisher<E>,
    locks: Arc<DestinationLocks>,
    events: EventBus,
}

impl<C, E> SourceSyncer<C, E>
where
    C: UpstreamClient,
    E: CommandExecutor + Clone + Send + 'static,
{
    pub fn new(
        source: SourceConfig,
        client: Arc<C>,
        cursor: Arc<CursorStore>,
        publisher: GitPublisher<E>,
        locks: Arc<DestinationLocks>,
        events: EventBus,
    ) -> Self {
        Self { source, client, cursor, publisher, locks, events }
    }

    /// Poll indefinitely on the configured interval until shutdown. A
    /// source with no interval is a configuration error and is never
    /// polled; the other sources' timers are unaffected.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.source.poll_interval_min == 0 {
            error!(
                url = %self.source.url,
                "source has no poll interval configured and will never be polled"
            );
            return;
        }

        info!(
            url = %self.source.url,
            destination = %self.source.destination.display(),
            interval_min = self.source.poll_interval_min,
            "watching source"
        );

        let period = Duration::from_secs(self.source.poll_interval_min * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(0) => debug!(url = %self.source.url, "no new revisions"),
                        Ok(published) => {
                            info!(url = %self.source.url, published, "tick finished");
                        }
                        Err(failure) => {
                            error!(
                                url = %self.source.url,
                                revision = ?failure.revision,
                                error = %failure.error,
                                "tick failed; will retry from the same cursor"
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(url = %self.source.url, "stopping source watcher");
                    break;
                }
            }
        }
    }

    /// One discovery-and-publish cycle. Emits one `Published` event per
    /// revision and one `Failure` event when the batch is aborted.
    pub async fn poll_once(&self) -> Result<usize, TickFailure> {
        match self.tick().await {
            Ok(published) => Ok(published),
            Err(failure) => {
                self.events.emit(SyncEvent::Failure {
                    source: self.source.url.clone(),
                    revision: failure.revision,
                    message: failure.error.to_string(),
                });
                Err(failure)
            }
        }
    }

    async fn tick(&self) -> Result<usize, TickFailure> {
        let discovery = |error: SyncError| TickFailure { revision: None, error };

        let cursor = self.cursor.get(&self.source.url).await.map_err(|e| discovery(e.into()))?;
        let report = self
            .client
            .fetch_report(&self.source, cursor + 1)
            .await
            .map_err(|e| discovery(e.into()))?;
        let records = parse_report(&report).map_err(|e| discovery(e.into()))?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut published = 0;
        for record in &records {
            // The report starts past the cursor, but a malformed record
            // (version left at zero) or a replayed report must never move
            // the mirror backwards.
            if record.number <= cursor {
                warn!(
                    url = %self.source.url,
                    revision = record.number,
                    cursor,
                    "skipping stale or unparsable revision"
                );
                continue;
            }

            let failed = |error: SyncError| TickFailure { revision: Some(record.number), error };

            self.publish_revision(record).await.map_err(failed)?;

            // Advance before touching the next record so a crash mid-batch
            // loses at most the in-flight revision.
            self.cursor
                .advance(&self.source.url, record.number)
                .await
                .map_err(|e| failed(e.into()))?;

            self.events.emit(SyncEvent::Published {
                source: self.source.url.clone(),
                revision: record.number,
                author: record.author_trimmed().to_string(),
                comment: record.comment.clone(),
                timestamp: record.created_at,
            });
            published += 1;
        }

        Ok(published)
    }

    /// Publish one revision end to end, holding the destination lock for
    /// the whole reset-repopulate-commit-push sequence.
    async fn publish_revision(&self, record: &RevisionRecord) -> Result<(), SyncError> {
        let lock = self.locks.lock_for(&self.source.destination);
        let _guard = lock.lock().await;

        debug!(url = %self.source.url, revision = record.number, "publishing revision");

        let publisher = self.publisher.clone();
        let branch = self.source.branch.clone();
        run_blocking(move || publisher.prepare(&branch)).await??;

        // Wipe before the dump so deleted upstream objects disappear from
        // the mirror as well.
        let destination = self.source.destination.clone();
        run_blocking(move || clear_destination(&destination))
            .await?
            .map_err(SyncError::ClearDestination)?;

        self.client.materialize(&self.source, record.number, &self.source.destination).await?;

        let publisher = self.publisher.clone();
        let branch = self.source.branch.clone();
        let record = record.clone();
        run_blocking(move || publisher.commit_and_push(&record, &branch)).await??;

        Ok(())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    task::spawn_blocking(f).await.map_err(|e| SyncError::Internal(e.to_string()))
}

/// Remove everything under the destination directory except the VCS
/// metadata directory.
fn clear_destination(destination: &Path) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(destination)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
