// Author identity mapping for commit attribution.
//
// A flat TOML table of upstream author name → `"Display Name <email>"`.
// The `Default` entry is mandatory: it is the commit identity used when an
// upstream author has no explicit mapping.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Key of the mandatory fallback entry.
pub const DEFAULT_KEY: &str = "Default";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read identity map {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse identity map {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("identity map is missing the mandatory {DEFAULT_KEY:?} entry")]
    MissingDefault,
    #[error("malformed identity {value:?} for {key:?}: expected \"Display Name <email>\"")]
    Malformed { key: String, value: String },
}

/// A resolved commit identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    /// Parse from the `"Display Name <email>"` form used in the map file.
    fn parse(key: &str, value: &str) -> Result<Self, IdentityError> {
        let malformed = || IdentityError::Malformed { key: key.to_string(), value: value.to_string() };

        let open = value.find('<').ok_or_else(malformed)?;
        let close = value.rfind('>').ok_or_else(malformed)?;
        if close < open {
            return Err(malformed());
        }

        let name = value[..open].trim();
        let email = value[open + 1..close].trim();
        if name.is_empty() || email.is_empty() {
            return Err(malformed());
        }

        Ok(Self { name: name.to_string(), email: email.to_string() })
    }

    /// The `"Display Name <email>"` form git expects for `--author`.
    pub fn as_author_arg(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Mapping from upstream author names to commit identities.
#[derive(Debug, Clone)]
pub struct IdentityMap {
    entries: HashMap<String, CommitIdentity>,
}

impl IdentityMap {
    /// Build from raw `name → "Display Name <email>"` pairs. Fails when the
    /// `Default` entry is absent or any entry is malformed.
    pub fn from_entries(raw: &HashMap<String, String>) -> Result<Self, IdentityError> {
        if !raw.contains_key(DEFAULT_KEY) {
            return Err(IdentityError::MissingDefault);
        }

        let mut entries = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            entries.insert(key.clone(), CommitIdentity::parse(key, value)?);
        }
        Ok(Self { entries })
    }

    /// Load from a flat TOML file.
    pub fn load_from(path: &Path) -> Result<Self, IdentityError> {
        let contents = std::fs::read_to_string(path).map_err(|source| IdentityError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: HashMap<String, String> =
            toml::from_str(&contents).map_err(|source| IdentityError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_entries(&raw)
    }

    /// Resolve an upstream author to a commit identity, falling back to the
    /// `Default` entry when no explicit mapping exists.
    pub fn resolve(&self, author: &str) -> &CommitIdentity {
        self.entries
            .get(author.trim())
            .unwrap_or_else(|| &self.entries[DEFAULT_KEY])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn missing_default_is_fatal() {
        let error = IdentityMap::from_entries(&raw(&[("Ivanov", "Ivan <ivan@x>")])).unwrap_err();
        assert!(matches!(error, IdentityError::MissingDefault));
    }

    #[test]
    fn unknown_author_falls_back_to_default() {
        let map = IdentityMap::from_entries(&raw(&[("Default", "Bot <bot@x>")])).unwrap();
        let identity = map.resolve("Unknown");
        assert_eq!(identity.name, "Bot");
        assert_eq!(identity.email, "bot@x");
    }

    #[test]
    fn explicit_mapping_wins_over_default() {
        let map = IdentityMap::from_entries(&raw(&[
            ("Default", "Bot <bot@x>"),
            ("Ivanov", "Ivan Ivanov <ivan@example.com>"),
        ]))
        .unwrap();
        assert_eq!(map.resolve("Ivanov").as_author_arg(), "Ivan Ivanov <ivan@example.com>");
    }

    #[test]
    fn author_lookup_ignores_padding() {
        let map = IdentityMap::from_entries(&raw(&[
            ("Default", "Bot <bot@x>"),
            ("Ivanov", "Ivan <ivan@x>"),
        ]))
        .unwrap();
        assert_eq!(map.resolve("  Ivanov ").name, "Ivan");
    }

    #[test]
    fn malformed_identity_is_rejected() {
        let error = IdentityMap::from_entries(&raw(&[("Default", "no email here")])).unwrap_err();
        assert!(matches!(error, IdentityError::Malformed { .. }));
    }

    #[test]
    fn empty_name_or_email_is_rejected() {
        assert!(IdentityMap::from_entries(&raw(&[("Default", "<bot@x>")])).is_err());
        assert!(IdentityMap::from_entries(&raw(&[("Default", "Bot <>")])).is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("users.toml");
        std::fs::write(
            &path,
            "Default = \"Bot <bot@x>\"\nIvanov = \"Ivan Ivanov <ivan@example.com>\"\n",
        )
        .unwrap();

        let map = IdentityMap::load_from(&path).unwrap();
        assert_eq!(map.resolve("Ivanov").email, "ivan@example.com");
        assert_eq!(map.resolve("Nobody").name, "Bot");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let error = IdentityMap::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(error, IdentityError::Io { .. }));
    }
}
