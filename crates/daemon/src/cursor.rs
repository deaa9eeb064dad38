// Durable version cursor store.
//
// One JSON file maps every upstream URL to the last revision number this
// engine successfully published for it. The file is shared by all monitored
// sources, so every write re-reads the file under the store-wide mutex
// before updating its one entry, otherwise a concurrent source's advance
// would be clobbered.

use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("failed to read cursor file {path:?}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("failed to write cursor file {path:?}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Durable mapping from upstream URL to last published revision.
#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    // Guards the whole read-modify-write cycle; the store is one shared file.
    lock: Mutex<()>,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last published revision for a source; 0 when the file or the entry
    /// is absent ("start from the beginning").
    pub async fn get(&self, source: &str) -> Result<u64, CursorError> {
        let _guard = self.lock.lock().await;
        let map = self.read_map()?;
        Ok(map.get(source).copied().unwrap_or(0))
    }

    /// Advance one source's entry, leaving every other entry untouched.
    pub async fn advance(&self, source: &str, revision: u64) -> Result<(), CursorError> {
        let _guard = self.lock.lock().await;

        let mut map = self.read_map()?;
        map.insert(source.to_string(), revision);
        self.write_map(&map)?;

        debug!(source, revision, "cursor advanced");
        Ok(())
    }

    fn read_map(&self) -> Result<BTreeMap<String, u64>, CursorError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(error) => {
                return Err(CursorError::Read { path: self.path.clone(), message: error.to_string() });
            }
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        // Tolerate non-integer junk values per entry but not a broken file.
        let raw: BTreeMap<String, Value> = serde_json::from_str(&contents).map_err(|error| {
            CursorError::Read { path: self.path.clone(), message: error.to_string() }
        })?;
        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| value.as_u64().map(|v| (key, v)))
            .collect())
    }

    fn write_map(&self, map: &BTreeMap<String, u64>) -> Result<(), CursorError> {
        let write_error = |error: &dyn std::fmt::Display| CursorError::Write {
            path: self.path.clone(),
            message: error.to_string(),
        };

        let contents =
            serde_json::to_string_pretty(map).map_err(|error| write_error(&error))?;

        // Write-to-temp then rename so a crash mid-write never truncates
        // the shared file.
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp =
            tempfile::NamedTempFile::new_in(dir).map_err(|error| write_error(&error))?;
        temp.write_all(contents.as_bytes()).map_err(|error| write_error(&error))?;
        temp.persist(&self.path).map_err(|error| write_error(&error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CursorStore {
        CursorStore::new(dir.path().join("versions"))
    }

    #[tokio::test]
    async fn absent_file_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).get("tcp://host/repo").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn absent_entry_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.advance("tcp://host/a", 4).await.unwrap();
        assert_eq!(store.get("tcp://host/b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn advance_then_get_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.advance("https://repo/a", 12).await.unwrap();
        assert_eq!(store.get("https://repo/a").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn file_is_human_readable_json() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.advance("https://repo/a", 12).await.unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["https://repo/a"], 12);
    }

    #[tokio::test]
    async fn advance_preserves_other_sources_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.advance("tcp://host/a", 10).await.unwrap();
        store.advance("tcp://host/b", 3).await.unwrap();
        store.advance("tcp://host/a", 11).await.unwrap();

        assert_eq!(store.get("tcp://host/a").await.unwrap(), 11);
        assert_eq!(store.get("tcp://host/b").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn existing_file_written_by_hand_is_honored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions");
        std::fs::write(&path, r#"{"https://repo/a": 10}"#).unwrap();

        let store = CursorStore::new(&path);
        assert_eq!(store.get("https://repo/a").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn unwritable_path_is_a_write_error() {
        let dir = TempDir::new().unwrap();
        // Parent directory does not exist, so the temp-file write fails.
        let store = CursorStore::new(dir.path().join("missing").join("versions"));

        assert_eq!(store.get("tcp://host/repo").await.unwrap(), 0);
        let error = store.advance("tcp://host/repo", 1).await.unwrap_err();
        assert!(matches!(error, CursorError::Write { .. }));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions");
        std::fs::write(&path, "not json").unwrap();

        let store = CursorStore::new(&path);
        assert!(matches!(store.get("x").await, Err(CursorError::Read { .. })));
    }

    #[tokio::test]
    async fn concurrent_advances_do_not_lose_updates() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));

        let mut tasks = Vec::new();
        for i in 0..16u64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.advance(&format!("tcp://host/{i}"), i + 1).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for i in 0..16u64 {
            assert_eq!(store.get(&format!("tcp://host/{i}")).await.unwrap(), i + 1);
        }
    }
}
