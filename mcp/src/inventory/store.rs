//! Snapshot persistence.
//!
//! [`FileIndexStore`] keeps two files in the cache directory:
//!
//! - `tool_index.json`: the tool records
//! - `index_metadata.json`: build time and per-server fingerprints
//!
//! Each file is written to a temporary file in the same directory and renamed
//! into place. Both carry the same `generation`; a pair whose generations
//! differ (two writers interleaved) loads as no snapshot.

use std::{
    collections::BTreeMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    snapshot::{IndexSnapshot, ServerIndexEntry},
    types::ToolRecord,
};

pub const TOOL_INDEX_FILE: &str = "tool_index.json";
pub const METADATA_FILE: &str = "index_metadata.json";

/// Load/save interface for index snapshots.
pub trait IndexStore: Send + Sync {
    /// Last saved snapshot, or `None` if absent or unreadable.
    fn load(&self) -> Option<IndexSnapshot>;

    /// Replace the saved snapshot atomically.
    fn save(&self, snapshot: &IndexSnapshot) -> io::Result<()>;
}

#[derive(Serialize, Deserialize)]
struct ToolIndexFile {
    generation: String,
    tools: Vec<ToolRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFile {
    generation: String,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    servers: BTreeMap<String, ServerIndexEntry>,
}

/// JSON files in a cache directory.
#[derive(Debug, Clone)]
pub struct FileIndexStore {
    dir: PathBuf,
}

impl FileIndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, file: &str) -> Option<T> {
        let path = self.dir.join(file);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupted cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_atomic(&self, file: &str, bytes: &[u8]) -> io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(file)).map_err(|e| e.error)?;
        Ok(())
    }
}

impl IndexStore for FileIndexStore {
    fn load(&self) -> Option<IndexSnapshot> {
        let metadata: MetadataFile = self.read_json(METADATA_FILE)?;
        let index: ToolIndexFile = self.read_json(TOOL_INDEX_FILE)?;

        if metadata.generation != index.generation {
            warn!(
                "Cache files in {} are from different builds; ignoring them",
                self.dir.display()
            );
            return None;
        }

        debug!(
            "Loaded {} cached tools from {}",
            index.tools.len(),
            self.dir.display()
        );
        Some(IndexSnapshot::new(
            metadata.last_updated,
            index.tools,
            metadata.servers,
        ))
    }

    fn save(&self, snapshot: &IndexSnapshot) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let generation = uuid::Uuid::new_v4().to_string();

        let index = ToolIndexFile {
            generation: generation.clone(),
            tools: snapshot.records().to_vec(),
        };
        let metadata = MetadataFile {
            generation,
            last_updated: snapshot.built_at(),
            servers: snapshot.servers().clone(),
        };

        self.write_atomic(TOOL_INDEX_FILE, &serde_json::to_vec_pretty(&index)?)?;
        self.write_atomic(METADATA_FILE, &serde_json::to_vec_pretty(&metadata)?)?;
        debug!(
            "Saved {} tools to {}",
            snapshot.len(),
            self.dir.display()
        );
        Ok(())
    }
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    snapshot: RwLock<Option<IndexSnapshot>>,
    saves: RwLock<usize>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
            saves: RwLock::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.read()
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self) -> Option<IndexSnapshot> {
        self.snapshot.read().clone()
    }

    fn save(&self, snapshot: &IndexSnapshot) -> io::Result<()> {
        *self.snapshot.write() = Some(snapshot.clone());
        *self.saves.write() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn create_test_snapshot() -> IndexSnapshot {
        let built_at = Utc::now();
        let mut servers = BTreeMap::new();
        servers.insert(
            "github".to_string(),
            ServerIndexEntry {
                fingerprint: "f1".to_string(),
                built_at,
                tool_count: 1,
                stale: false,
                error: None,
            },
        );
        IndexSnapshot::new(
            built_at,
            vec![ToolRecord {
                server: "github".to_string(),
                name: "create_issue".to_string(),
                description: "Create an issue".to_string(),
                input_schema: json!({"type": "object", "required": ["title"]}),
                built_at,
            }],
            servers,
        )
    }

    #[test]
    fn test_file_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIndexStore::new(dir.path().join("cache"));
        assert!(store.load().is_none());

        let snapshot = create_test_snapshot();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load(), Some(snapshot));
        assert!(dir.path().join("cache").join(TOOL_INDEX_FILE).exists());
        assert!(dir.path().join("cache").join(METADATA_FILE).exists());
    }

    #[test]
    fn test_corrupted_cache_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());
        store.save(&create_test_snapshot()).unwrap();

        fs::write(dir.path().join(TOOL_INDEX_FILE), "{ not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_mismatched_generations_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());
        store.save(&create_test_snapshot()).unwrap();
        let first_index = fs::read(dir.path().join(TOOL_INDEX_FILE)).unwrap();

        store.save(&create_test_snapshot()).unwrap();
        fs::write(dir.path().join(TOOL_INDEX_FILE), first_index).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());
        store.save(&create_test_snapshot()).unwrap();
        store.save(&create_test_snapshot()).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![METADATA_FILE, TOOL_INDEX_FILE]);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryIndexStore::new();
        assert!(store.load().is_none());
        store.save(&create_test_snapshot()).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().map(|s| s.len()), Some(1));
    }
}
