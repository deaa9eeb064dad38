// confsyncd: standalone daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path =
        std::env::args().nth(1).map_or_else(|| PathBuf::from("confsync.toml"), PathBuf::from);

    info!("starting confsync daemon");
    confsync_daemon::runtime::run(&config_path).await.context("daemon terminated unexpectedly")
}
