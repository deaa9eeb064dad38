// `confsync run` — run the synchronization daemon in the foreground.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the daemon configuration file.
    #[arg(long, default_value = "confsync.toml")]
    config: PathBuf,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!(config = %args.config.display(), "starting synchronization daemon");
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime should build")
        .block_on(confsync_daemon::runtime::run(&args.config))
}
