// Daemon configuration, loaded once at startup from a TOML file.
//
// Mid-run reload is not supported: sources are immutable for the process
// lifetime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default cursor file name, kept next to the config unless overridden.
pub const DEFAULT_CURSOR_FILE: &str = "versions";
/// Default identity map file name.
pub const DEFAULT_IDENTITY_FILE: &str = "users.toml";

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Path to the platform's command-line control binary.
    pub platform_bin: PathBuf,
    /// Durable cursor file shared by every monitored source.
    pub cursor_file: PathBuf,
    /// Author identity map (must contain a `Default` entry).
    pub identity_file: PathBuf,
    /// Extension template loaded into scratch workspaces for extension
    /// sources. Required only when an extension source is configured.
    pub extension_template: Option<PathBuf>,
    /// Monitored upstream repositories.
    #[serde(rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            platform_bin: PathBuf::new(),
            cursor_file: PathBuf::from(DEFAULT_CURSOR_FILE),
            identity_file: PathBuf::from(DEFAULT_IDENTITY_FILE),
            extension_template: None,
            sources: Vec::new(),
        }
    }
}

/// One monitored upstream repository and its destination.
///
/// The single capability set every component consumes: upstream path and
/// credentials, the extension flag (changes which platform switches are
/// legal), the poll interval, and the destination directory and branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Upstream repository URL (also the cursor key).
    pub url: String,
    pub login: String,
    pub password: String,
    /// Whether the upstream repository holds an extension.
    pub extension: bool,
    /// Poll interval in minutes. Zero disables polling for this source
    /// (logged as a configuration error, never polled).
    pub poll_interval_min: u64,
    /// Local working copy of the destination repository.
    pub destination: PathBuf,
    /// Destination branch.
    pub branch: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            login: String::new(),
            password: String::new(),
            extension: false,
            poll_interval_min: 0,
            destination: PathBuf::new(),
            branch: "master".into(),
        }
    }
}

impl Settings {
    /// Load from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a TOML file (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Collect configuration problems without failing fast, so `confsync
    /// check` can report all of them at once.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.platform_bin.as_os_str().is_empty() {
            problems.push("platform_bin is not set".into());
        }
        if self.sources.is_empty() {
            problems.push("no [[source]] entries configured".into());
        }
        for source in &self.sources {
            if source.url.is_empty() {
                problems.push("source with empty url".into());
                continue;
            }
            if source.poll_interval_min == 0 {
                problems.push(format!("source {:?} has no poll interval and will never be polled", source.url));
            }
            if source.destination.as_os_str().is_empty() {
                problems.push(format!("source {:?} has no destination directory", source.url));
            }
            if source.branch.is_empty() {
                problems.push(format!("source {:?} has no destination branch", source.url));
            }
            if source.extension && self.extension_template.is_none() {
                problems.push(format!(
                    "source {:?} is an extension but extension_template is not set",
                    source.url
                ));
            }
        }

        problems
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Settings {
        Settings {
            platform_bin: PathBuf::from("/opt/1cv8/8.3.20/1cv8"),
            cursor_file: PathBuf::from("/var/lib/confsync/versions"),
            identity_file: PathBuf::from("/etc/confsync/users.toml"),
            extension_template: None,
            sources: vec![SourceConfig {
                url: "tcp://host/repo".into(),
                login: "sync".into(),
                password: "secret".into(),
                extension: false,
                poll_interval_min: 5,
                destination: PathBuf::from("/srv/mirror/repo"),
                branch: "master".into(),
            }],
        }
    }

    #[test]
    fn roundtrip_through_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("confsync.toml");

        let settings = sample();
        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(settings, loaded);
    }

    #[test]
    fn parse_from_toml_text() {
        let toml_str = r#"
platform_bin = "/opt/1cv8/1cv8"

[[source]]
url = "tcp://host/repo"
login = "sync"
password = "secret"
poll_interval_min = 10
destination = "/srv/mirror/repo"
branch = "sync/main"
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.sources.len(), 1);
        assert_eq!(settings.sources[0].branch, "sync/main");
        assert_eq!(settings.cursor_file, PathBuf::from(DEFAULT_CURSOR_FILE));
        assert!(!settings.sources[0].extension);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn valid_settings_have_no_problems() {
        assert!(sample().problems().is_empty());
    }

    #[test]
    fn zero_interval_is_reported() {
        let mut settings = sample();
        settings.sources[0].poll_interval_min = 0;
        let problems = settings.problems();
        assert!(problems.iter().any(|p| p.contains("never be polled")));
    }

    #[test]
    fn extension_without_template_is_reported() {
        let mut settings = sample();
        settings.sources[0].extension = true;
        let problems = settings.problems();
        assert!(problems.iter().any(|p| p.contains("extension_template")));
    }

    #[test]
    fn empty_settings_report_missing_bin_and_sources() {
        let problems = Settings::default().problems();
        assert!(problems.iter().any(|p| p.contains("platform_bin")));
        assert!(problems.iter().any(|p| p.contains("source")));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let error = Settings::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(error, ConfigError::Io(_)));
    }
}
