//! Snapshot persistence collaborator. The engine only ever hands out copies;
//! the storage format belongs to the store.

use crate::error::{Result, SyncError};
use crate::types::GameSnapshot;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &GameSnapshot) -> Result<()>;
    /// `SyncError::SnapshotNotFound` when nothing has been saved yet.
    fn load(&self) -> Result<GameSnapshot>;
}

/// One pretty-printed JSON file, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub const FILE_NAME: &'static str = "snapshot.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    /// `{data_dir}/snapshot.json`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &GameSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<GameSnapshot> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SyncError::SnapshotNotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<GameSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: GameSnapshot) -> Self {
        MemoryStore {
            slot: Mutex::new(Some(snapshot)),
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, snapshot: &GameSnapshot) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| SyncError::Io("snapshot store lock poisoned".into()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<GameSnapshot> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| SyncError::Io("snapshot store lock poisoned".into()))?;
        slot.clone().ok_or(SyncError::SnapshotNotFound)
    }
}
