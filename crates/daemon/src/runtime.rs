// Daemon runtime: wire the components together and supervise one watcher
// task per configured source until ctrl-c.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use confsync_common::identity::IdentityMap;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Settings;
use crate::cursor::CursorStore;
use crate::events::{log_events, EventBus};
use crate::git::GitPublisher;
use crate::platform::PlatformClient;
use crate::sync::{DestinationLocks, SourceSyncer};

pub async fn run(config_path: &Path) -> Result<()> {
    let settings = Settings::load_from(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    for problem in settings.problems() {
        warn!(%problem, "configuration problem");
    }
    if settings.sources.is_empty() {
        bail!("no sources configured in {}", config_path.display());
    }

    let identities = IdentityMap::load_from(&settings.identity_file).with_context(|| {
        format!("failed to load identity map from {}", settings.identity_file.display())
    })?;

    let client = Arc::new(PlatformClient::new(
        &settings.platform_bin,
        settings.extension_template.clone(),
    ));
    let cursor = Arc::new(CursorStore::new(&settings.cursor_file));
    let locks = Arc::new(DestinationLocks::default());
    let events = EventBus::default();
    tokio::spawn(log_events(events.subscribe()));

    let (shutdown_tx, _) = broadcast::channel(4);
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = ctrl_c_tx.send(());
    });

    info!(
        config = %config_path.display(),
        sources = settings.sources.len(),
        cursor_file = %settings.cursor_file.display(),
        "daemon started"
    );

    let mut watchers = Vec::new();
    for source in settings.sources {
        let publisher = GitPublisher::new(&source.destination, identities.clone());
        let syncer = SourceSyncer::new(
            source,
            Arc::clone(&client),
            Arc::clone(&cursor),
            publisher,
            Arc::clone(&locks),
            events.clone(),
        );
        watchers.push(tokio::spawn(syncer.run(shutdown_tx.subscribe())));
    }

    for watcher in watchers {
        watcher.await.context("source watcher task panicked")?;
    }

    info!("daemon stopped");
    Ok(())
}
