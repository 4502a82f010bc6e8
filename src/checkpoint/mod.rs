//! Checkpointing: snapshot capture, storage backends, and coordination.
//!
//! A checkpoint is an immutable capture of each partition's session table,
//! watermark, and input cursor, taken at a quiescent point (between events,
//! never mid-fold). Restoring the latest checkpoint and replaying records
//! from the stored cursors onward reproduces the same session closures as an
//! uninterrupted run.
//!
//! Snapshots are serialized as JSON with sorted session entries, so the
//! bytes round-trip losslessly and deterministically.

mod coordinator;

pub use coordinator::CheckpointCoordinator;

use crate::session::SessionEntry;
use crate::source::{Cursor, PartitionId};
use crate::watermark::WatermarkSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Error while capturing or persisting a snapshot.
///
/// Retried with backoff up to the configured limit; exhaustion is fatal to
/// the whole flow, since recovery guarantees can no longer be trusted.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// I/O or filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Backend-specific storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Error while restoring from a checkpoint.
///
/// Fatal at startup; no partial recovery is attempted.
#[derive(Error, Debug)]
pub enum RestoreError {
    /// The requested checkpoint does not exist.
    #[error("checkpoint not found: {0}")]
    NotFound(String),
    /// The checkpoint exists but could not be decoded.
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
    /// I/O or filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifier for a checkpoint. Monotonically increasing within a flow.
#[derive(
    Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CheckpointId(pub u64);

impl CheckpointId {
    /// Creates a new checkpoint id from a raw value.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Metadata for a checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Checkpoint identifier.
    pub id: CheckpointId,
    /// Wall-clock creation time (informational only).
    pub created_at: DateTime<Utc>,
    /// Partitions captured in this checkpoint.
    pub partitions: Vec<PartitionId>,
}

/// Immutable capture of one partition's complete state.
///
/// Session entries are sorted by key so serialization is deterministic. The
/// cursor is the input source's own resumable position, opaque to the
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSnapshot<K, A> {
    /// Partition this snapshot belongs to.
    pub partition: PartitionId,
    /// Watermark tracker state.
    pub watermark: WatermarkSnapshot,
    /// Open sessions at the snapshot boundary, sorted by key.
    pub sessions: Vec<SessionEntry<K, A>>,
    /// Input position: everything up to and including it has been folded.
    pub cursor: Cursor,
}

/// Trait for checkpoint storage backends.
///
/// A checkpoint is stored as metadata plus one opaque byte blob per
/// partition; `save` must persist them as one atomic unit.
pub trait CheckpointStorage: Send + Sync {
    /// Saves a checkpoint with the given metadata and per-partition
    /// snapshot bytes.
    fn save(
        &self,
        metadata: &CheckpointMetadata,
        partitions: &HashMap<String, Vec<u8>>,
    ) -> Result<(), SnapshotError>;

    /// Loads a checkpoint by id. Returns metadata and per-partition bytes.
    fn load(
        &self,
        id: CheckpointId,
    ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), RestoreError>;

    /// Lists available checkpoint ids in ascending order.
    fn list(&self) -> Result<Vec<CheckpointId>, RestoreError>;

    /// Returns the most recent checkpoint id, if any.
    fn latest(&self) -> Result<Option<CheckpointId>, RestoreError> {
        Ok(self.list()?.into_iter().max())
    }

    /// Removes a checkpoint (garbage collection of superseded snapshots).
    fn remove(&self, id: CheckpointId) -> Result<(), SnapshotError>;
}

/// File-based checkpoint storage.
///
/// Each checkpoint is a subdirectory `<base>/<id>/` containing
/// `metadata.json` and one `<partition>.snap` JSON file per partition.
pub struct FileCheckpointStorage {
    base_path: std::path::PathBuf,
}

impl FileCheckpointStorage {
    /// Creates a new file checkpoint storage at the given path.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn checkpoint_dir(&self, id: CheckpointId) -> std::path::PathBuf {
        self.base_path.join(id.as_u64().to_string())
    }
}

impl CheckpointStorage for FileCheckpointStorage {
    fn save(
        &self,
        metadata: &CheckpointMetadata,
        partitions: &HashMap<String, Vec<u8>>,
    ) -> Result<(), SnapshotError> {
        let dir = self.checkpoint_dir(metadata.id);
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        std::fs::write(dir.join("metadata.json"), json)?;

        for (partition, data) in partitions {
            let safe_name =
                partition.replace(|c: char| !c.is_alphanumeric() && c != '_' && c != '-', "_");
            std::fs::write(dir.join(format!("{}.snap", safe_name)), data)?;
        }

        Ok(())
    }

    fn load(
        &self,
        id: CheckpointId,
    ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), RestoreError> {
        let dir = self.checkpoint_dir(id);
        if !dir.exists() {
            return Err(RestoreError::NotFound(id.as_u64().to_string()));
        }

        let json = std::fs::read_to_string(dir.join("metadata.json"))?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(&json).map_err(|e| RestoreError::Corrupt(e.to_string()))?;

        let mut partitions = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "snap") {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("")
                    .to_string();
                partitions.insert(name, std::fs::read(&path)?);
            }
        }

        Ok((metadata, partitions))
    }

    fn list(&self) -> Result<Vec<CheckpointId>, RestoreError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if let Some(s) = entry.file_name().to_str() {
                if let Ok(id) = s.parse::<u64>() {
                    ids.push(CheckpointId::new(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn remove(&self, id: CheckpointId) -> Result<(), SnapshotError> {
        let dir = self.checkpoint_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

type StoredCheckpoint = (CheckpointMetadata, HashMap<String, Vec<u8>>);

/// In-memory checkpoint storage. Intended for tests and demos.
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<BTreeMap<u64, StoredCheckpoint>>,
}

impl InMemoryCheckpointStorage {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn save(
        &self,
        metadata: &CheckpointMetadata,
        partitions: &HashMap<String, Vec<u8>>,
    ) -> Result<(), SnapshotError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|e| SnapshotError::Storage(e.to_string()))?;
        checkpoints.insert(metadata.id.as_u64(), (metadata.clone(), partitions.clone()));
        Ok(())
    }

    fn load(
        &self,
        id: CheckpointId,
    ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), RestoreError> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|e| RestoreError::Corrupt(e.to_string()))?;
        checkpoints
            .get(&id.as_u64())
            .cloned()
            .ok_or_else(|| RestoreError::NotFound(id.as_u64().to_string()))
    }

    fn list(&self) -> Result<Vec<CheckpointId>, RestoreError> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|e| RestoreError::Corrupt(e.to_string()))?;
        Ok(checkpoints.keys().copied().map(CheckpointId::new).collect())
    }

    fn remove(&self, id: CheckpointId) -> Result<(), SnapshotError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|e| SnapshotError::Storage(e.to_string()))?;
        checkpoints.remove(&id.as_u64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::EventTime;
    use tempfile::TempDir;

    fn sample_snapshot() -> PartitionSnapshot<String, u32> {
        PartitionSnapshot {
            partition: PartitionId::new("partition-0"),
            watermark: WatermarkSnapshot {
                max_seen: Some(EventTime::new(7_000)),
            },
            sessions: vec![SessionEntry {
                key: "a".to_string(),
                start_time: EventTime::new(5_000),
                last_event_time: EventTime::new(7_000),
                accumulator: 3,
            }],
            cursor: Cursor::Sequence(4),
        }
    }

    fn stored(snapshot: &PartitionSnapshot<String, u32>) -> (CheckpointMetadata, HashMap<String, Vec<u8>>) {
        let metadata = CheckpointMetadata {
            id: CheckpointId::new(1),
            created_at: Utc::now(),
            partitions: vec![snapshot.partition.clone()],
        };
        let mut partitions = HashMap::new();
        partitions.insert(
            snapshot.partition.as_str().to_string(),
            serde_json::to_vec(snapshot).unwrap(),
        );
        (metadata, partitions)
    }

    #[test]
    fn partition_snapshot_round_trip() {
        let snapshot = sample_snapshot();
        let bytes = serde_json::to_vec(&snapshot).unwrap();
        let back: PartitionSnapshot<String, u32> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn file_storage_save_load_list() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path());
        let snapshot = sample_snapshot();
        let (metadata, partitions) = stored(&snapshot);

        storage.save(&metadata, &partitions).unwrap();

        let (loaded_meta, loaded_parts) = storage.load(CheckpointId::new(1)).unwrap();
        assert_eq!(loaded_meta.id, CheckpointId::new(1));
        assert_eq!(loaded_meta.partitions, vec![PartitionId::new("partition-0")]);

        let bytes = loaded_parts.get("partition-0").unwrap();
        let back: PartitionSnapshot<String, u32> = serde_json::from_slice(bytes).unwrap();
        assert_eq!(back, snapshot);

        assert_eq!(storage.list().unwrap(), vec![CheckpointId::new(1)]);
        assert_eq!(storage.latest().unwrap(), Some(CheckpointId::new(1)));
    }

    #[test]
    fn file_storage_remove() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path());
        let snapshot = sample_snapshot();
        let (metadata, partitions) = stored(&snapshot);

        storage.save(&metadata, &partitions).unwrap();
        storage.remove(CheckpointId::new(1)).unwrap();
        assert!(storage.list().unwrap().is_empty());
        assert!(matches!(
            storage.load(CheckpointId::new(1)),
            Err(RestoreError::NotFound(_))
        ));
    }

    #[test]
    fn file_storage_load_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path());
        assert!(matches!(
            storage.load(CheckpointId::new(9)),
            Err(RestoreError::NotFound(_))
        ));
    }

    #[test]
    fn file_storage_corrupt_metadata_fails() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path());

        let dir = tmp.path().join("3");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.json"), b"not json").unwrap();

        assert!(matches!(
            storage.load(CheckpointId::new(3)),
            Err(RestoreError::Corrupt(_))
        ));
    }

    #[test]
    fn in_memory_storage_round_trip() {
        let storage = InMemoryCheckpointStorage::new();
        let snapshot = sample_snapshot();
        let (metadata, partitions) = stored(&snapshot);

        storage.save(&metadata, &partitions).unwrap();
        let (loaded_meta, loaded_parts) = storage.load(CheckpointId::new(1)).unwrap();
        assert_eq!(loaded_meta.id, CheckpointId::new(1));
        assert_eq!(loaded_parts.len(), 1);

        storage.remove(CheckpointId::new(1)).unwrap();
        assert_eq!(storage.latest().unwrap(), None);
    }
}
