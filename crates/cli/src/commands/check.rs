// `confsync check` — validate the configuration and identity map without
// touching any upstream repository.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use confsync_common::identity::IdentityMap;
use confsync_daemon::config::Settings;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the daemon configuration file.
    #[arg(long, default_value = "confsync.toml")]
    config: PathBuf,
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let problems = collect_problems(&args.config)?;
    if problems.is_empty() {
        println!("configuration ok");
        return Ok(());
    }

    for problem in &problems {
        println!("problem: {problem}");
    }
    anyhow::bail!("configuration has {} problem(s)", problems.len());
}

fn collect_problems(config_path: &Path) -> anyhow::Result<Vec<String>> {
    let settings = Settings::load_from(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    let mut problems = settings.problems();

    // Loading validates the map shape and the mandatory default entry;
    // per-author resolution can never fail after that.
    if let Err(error) = IdentityMap::load_from(&settings.identity_file) {
        problems.push(format!("identity map {}: {error}", settings.identity_file.display()));
    }

    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, identity_file: &Path) -> PathBuf {
        let path = dir.path().join("confsync.toml");
        let contents = format!(
            r#"
platform_bin = "/opt/1cv8/1cv8"
identity_file = {identity_file:?}

[[source]]
url = "tcp://host/repo"
login = "sync"
password = "secret"
poll_interval_min = 5
destination = "/srv/mirror/repo"
"#
        );
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn valid_config_and_identities_pass() {
        let dir = TempDir::new().unwrap();
        let identity_file = dir.path().join("users.toml");
        std::fs::write(&identity_file, "Default = \"Bot <bot@example.com>\"\n").unwrap();

        let config = write_config(&dir, &identity_file);
        assert!(collect_problems(&config).unwrap().is_empty());
    }

    #[test]
    fn missing_identity_map_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, &dir.path().join("absent.toml"));

        let problems = collect_problems(&config).unwrap();
        assert!(problems.iter().any(|p| p.contains("identity map")));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(collect_problems(&dir.path().join("absent.toml")).is_err());
    }
}
