//! Persisted run state.
//!
//! The destination carries one small state file holding a key/value
//! mapping. The rotation engine owns a single key in it, the name of the
//! last finest-tier snapshot that synced successfully; other keys are left
//! untouched across updates.

use crate::error::{SnapError, SnapResult};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the state file inside the destination.
pub const STATE_FILE: &str = ".snapcycle.json";
/// Temporary file for atomic state writes.
const STATE_TEMP: &str = ".snapcycle.json.tmp";
/// Key holding the last confirmed finest-tier snapshot.
pub const MARKER_KEY: &str = "last_confirmed_snapshot";

/// A string key/value store with read-modify-write updates.
///
/// # Implementors
///
/// - [`JsonFileStore`] - the state file in the destination
/// - [`MemoryStore`] - for testing
pub trait StateStore: Send + Sync {
    /// Reads a value. A missing store reads as `None`.
    fn get(&self, key: &str) -> SnapResult<Option<String>>;

    /// Writes a value, preserving every other key.
    fn set(&self, key: &str, value: &str) -> SnapResult<()>;
}

impl<S: StateStore + ?Sized> StateStore for &S {
    fn get(&self, key: &str) -> SnapResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> SnapResult<()> {
        (**self).set(key, value)
    }
}

/// Returns the last confirmed finest-tier snapshot name, if any.
pub fn read_marker(store: &dyn StateStore) -> SnapResult<Option<String>> {
    Ok(store.get(MARKER_KEY)?.filter(|name| !name.is_empty()))
}

/// Records `name` as the last confirmed finest-tier snapshot.
pub fn write_marker(store: &dyn StateStore, name: &str) -> SnapResult<()> {
    store.set(MARKER_KEY, name)
}

/// State file backed by a JSON object.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl JsonFileStore {
    /// Opens the state file of a destination. The file need not exist.
    #[must_use]
    pub fn for_destination(destination: &Path) -> Self {
        Self {
            path: destination.join(STATE_FILE),
            temp_path: destination.join(STATE_TEMP),
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SnapResult<Map<String, Value>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SnapError::corrupt_state(
                &self.path,
                format!("expected an object, found {other}"),
            )),
            Err(e) => Err(SnapError::corrupt_state(&self.path, e.to_string())),
        }
    }

    /// Writes via temp file, fsync, rename, then fsyncs the directory.
    fn save(&self, map: &Map<String, Value>) -> SnapResult<()> {
        let data = serde_json::to_vec_pretty(map)
            .map_err(|e| SnapError::corrupt_state(&self.path, e.to_string()))?;

        let mut file = File::create(&self.temp_path)?;
        file.write_all(&data)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> SnapResult<()> {
        if let Some(dir) = self.path.parent() {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SnapResult<()> {
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> SnapResult<Option<String>> {
        Ok(self
            .load()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> SnapResult<()> {
        let mut map = self.load()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&map)
    }
}

/// An in-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> SnapResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SnapResult<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_absent() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::for_destination(temp.path());
        assert_eq!(read_marker(&store).unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn empty_file_reads_as_absent() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::for_destination(temp.path());
        fs::write(store.path(), b"\n").unwrap();
        assert_eq!(read_marker(&store).unwrap(), None);
    }

    #[test]
    fn marker_round_trip() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::for_destination(temp.path());

        write_marker(&store, "2024-03-11.14").unwrap();
        assert_eq!(read_marker(&store).unwrap().as_deref(), Some("2024-03-11.14"));

        write_marker(&store, "2024-03-11.15").unwrap();
        assert_eq!(read_marker(&store).unwrap().as_deref(), Some("2024-03-11.15"));
        assert!(!temp.path().join(STATE_TEMP).exists());
    }

    #[test]
    fn preserves_other_keys() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::for_destination(temp.path());
        fs::write(
            store.path(),
            br#"{ "owner": "ops", "retries": 3, "last_confirmed_snapshot": "old" }"#,
        )
        .unwrap();

        write_marker(&store, "new").unwrap();

        let raw: Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["owner"], "ops");
        assert_eq!(raw["retries"], 3);
        assert_eq!(raw[MARKER_KEY], "new");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::for_destination(temp.path());

        fs::write(store.path(), b"not json").unwrap();
        assert!(matches!(
            read_marker(&store),
            Err(SnapError::CorruptState { .. })
        ));

        fs::write(store.path(), b"[1, 2]").unwrap();
        assert!(matches!(
            store.set(MARKER_KEY, "x"),
            Err(SnapError::CorruptState { .. })
        ));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(read_marker(&store).unwrap(), None);
        store.set("other", "kept").unwrap();
        write_marker(&store, "2024").unwrap();
        let values = store.snapshot();
        assert_eq!(values.get("other").map(String::as_str), Some("kept"));
        assert_eq!(values.get(MARKER_KEY).map(String::as_str), Some("2024"));
    }
}
