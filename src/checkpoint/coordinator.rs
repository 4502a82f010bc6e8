//! Checkpoint coordination: assembly, retry, and garbage collection.

use super::{
    CheckpointId, CheckpointMetadata, CheckpointStorage, PartitionSnapshot, RestoreError,
    SnapshotError,
};
use crate::config::RetryPolicy;
use crate::error::EngineError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// Assembles per-partition snapshots into checkpoints and restores them.
///
/// One coordinator exists per flow. Commits happen only when every partition
/// has reached a quiescent point and handed over its snapshot; the
/// coordinator persists the combined unit, retrying failed saves with
/// exponential backoff before giving up, and garbage-collects superseded
/// checkpoints afterwards.
pub struct CheckpointCoordinator<S> {
    storage: Arc<S>,
    retry: RetryPolicy,
    retain: usize,
    next_id: u64,
}

impl<S: CheckpointStorage> CheckpointCoordinator<S> {
    /// Creates a coordinator over `storage`, retaining the last two
    /// checkpoints.
    pub fn new(storage: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            storage,
            retry,
            retain: 2,
            next_id: 1,
        }
    }

    /// Sets how many committed checkpoints to keep before older ones are
    /// garbage-collected. Clamped to at least one.
    #[must_use]
    pub fn with_retain_last(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }

    /// Persists one checkpoint from the given partition snapshots.
    ///
    /// Saves are retried per the retry policy; exhaustion is fatal to the
    /// flow and surfaces as [`EngineError::SnapshotExhausted`]. Garbage
    /// collection of superseded checkpoints is best-effort and only logged.
    pub async fn commit<K, A>(
        &mut self,
        snapshots: &[PartitionSnapshot<K, A>],
    ) -> Result<CheckpointId, EngineError>
    where
        K: Serialize,
        A: Serialize,
    {
        let id = CheckpointId::new(self.next_id);

        let mut partitions = HashMap::new();
        let mut partition_ids = Vec::new();
        for snapshot in snapshots {
            let bytes = serde_json::to_vec(snapshot)
                .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
            partitions.insert(snapshot.partition.as_str().to_string(), bytes);
            partition_ids.push(snapshot.partition.clone());
        }
        partition_ids.sort();

        let metadata = CheckpointMetadata {
            id,
            created_at: chrono::Utc::now(),
            partitions: partition_ids,
        };

        let mut attempt: u32 = 0;
        loop {
            match self.storage.save(&metadata, &partitions) {
                Ok(()) => break,
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        checkpoint = id.as_u64(),
                        attempt,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "checkpoint save failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    tracing::error!(
                        checkpoint = id.as_u64(),
                        error = %err,
                        "checkpoint save failed after all retries"
                    );
                    return Err(EngineError::SnapshotExhausted {
                        attempts: attempt as usize + 1,
                        source: err,
                    });
                }
            }
        }

        tracing::debug!(
            checkpoint = id.as_u64(),
            partitions = snapshots.len(),
            "checkpoint committed"
        );
        self.next_id += 1;
        self.collect_garbage();
        Ok(id)
    }

    /// Loads the most recent checkpoint, if any, decoding every partition
    /// snapshot. Later commits continue the id sequence after it.
    ///
    /// A corrupt or unreadable checkpoint is fatal; no partial recovery is
    /// attempted.
    pub fn load_latest<K, A>(
        &mut self,
    ) -> Result<Option<(CheckpointMetadata, Vec<PartitionSnapshot<K, A>>)>, RestoreError>
    where
        K: DeserializeOwned,
        A: DeserializeOwned,
    {
        let Some(id) = self.storage.latest()? else {
            return Ok(None);
        };
        let (metadata, partitions) = self.storage.load(id)?;

        let mut snapshots = Vec::with_capacity(partitions.len());
        for (name, bytes) in &partitions {
            let snapshot: PartitionSnapshot<K, A> = serde_json::from_slice(bytes)
                .map_err(|e| RestoreError::Corrupt(format!("partition {}: {}", name, e)))?;
            snapshots.push(snapshot);
        }
        snapshots.sort_by(|a, b| a.partition.cmp(&b.partition));

        self.next_id = id.as_u64() + 1;
        tracing::debug!(
            checkpoint = id.as_u64(),
            partitions = snapshots.len(),
            "checkpoint restored"
        );
        Ok(Some((metadata, snapshots)))
    }

    fn collect_garbage(&self) {
        let ids = match self.storage.list() {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "checkpoint listing failed during gc");
                return;
            }
        };
        if ids.len() <= self.retain {
            return;
        }
        let cutoff = ids.len() - self.retain;
        for id in &ids[..cutoff] {
            if let Err(err) = self.storage.remove(*id) {
                tracing::warn!(checkpoint = id.as_u64(), error = %err, "checkpoint gc failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStorage;
    use crate::source::{Cursor, PartitionId};
    use crate::time::EventTime;
    use crate::watermark::WatermarkSnapshot;

    fn snapshot(partition: &str, cursor: u64) -> PartitionSnapshot<String, u32> {
        PartitionSnapshot {
            partition: PartitionId::new(partition),
            watermark: WatermarkSnapshot {
                max_seen: Some(EventTime::new(1_000 * cursor)),
            },
            sessions: Vec::new(),
            cursor: Cursor::Sequence(cursor),
        }
    }

    #[tokio::test]
    async fn commit_and_load_latest() {
        let storage = Arc::new(InMemoryCheckpointStorage::new());
        let mut coordinator =
            CheckpointCoordinator::new(Arc::clone(&storage), RetryPolicy::default());

        let id = coordinator
            .commit(&[snapshot("p0", 3), snapshot("p1", 5)])
            .await
            .unwrap();
        assert_eq!(id, CheckpointId::new(1));

        let (metadata, snapshots) = coordinator
            .load_latest::<String, u32>()
            .unwrap()
            .expect("checkpoint present");
        assert_eq!(metadata.id, CheckpointId::new(1));
        assert_eq!(snapshots.len(), 2);
        // Sorted by partition id.
        assert_eq!(snapshots[0].partition, PartitionId::new("p0"));
        assert_eq!(snapshots[0].cursor, Cursor::Sequence(3));
        assert_eq!(snapshots[1].cursor, Cursor::Sequence(5));
    }

    #[tokio::test]
    async fn ids_continue_after_restore() {
        let storage = Arc::new(InMemoryCheckpointStorage::new());
        let mut coordinator =
            CheckpointCoordinator::new(Arc::clone(&storage), RetryPolicy::default());
        coordinator.commit(&[snapshot("p0", 1)]).await.unwrap();

        let mut reopened =
            CheckpointCoordinator::new(Arc::clone(&storage), RetryPolicy::default());
        reopened.load_latest::<String, u32>().unwrap();
        let id = reopened.commit(&[snapshot("p0", 2)]).await.unwrap();
        assert_eq!(id, CheckpointId::new(2));
    }

    #[tokio::test]
    async fn gc_retains_last_n() {
        let storage = Arc::new(InMemoryCheckpointStorage::new());
        let mut coordinator =
            CheckpointCoordinator::new(Arc::clone(&storage), RetryPolicy::default())
                .with_retain_last(2);

        for cursor in 1..=4 {
            coordinator.commit(&[snapshot("p0", cursor)]).await.unwrap();
        }

        let ids = storage.list().unwrap();
        assert_eq!(ids, vec![CheckpointId::new(3), CheckpointId::new(4)]);
    }

    #[tokio::test]
    async fn load_latest_on_empty_storage_is_none() {
        let storage = Arc::new(InMemoryCheckpointStorage::new());
        let mut coordinator = CheckpointCoordinator::new(storage, RetryPolicy::default());
        assert!(coordinator.load_latest::<String, u32>().unwrap().is_none());
    }

    #[tokio::test]
    async fn save_failures_exhaust_retries() {
        struct FailingStorage;
        impl CheckpointStorage for FailingStorage {
            fn save(
                &self,
                _metadata: &CheckpointMetadata,
                _partitions: &HashMap<String, Vec<u8>>,
            ) -> Result<(), SnapshotError> {
                Err(SnapshotError::Storage("disk full".to_string()))
            }
            fn load(
                &self,
                id: CheckpointId,
            ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), RestoreError> {
                Err(RestoreError::NotFound(id.as_u64().to_string()))
            }
            fn list(&self) -> Result<Vec<CheckpointId>, RestoreError> {
                Ok(Vec::new())
            }
            fn remove(&self, _id: CheckpointId) -> Result<(), SnapshotError> {
                Ok(())
            }
        }

        let retry = RetryPolicy {
            max_retries: 2,
            initial_backoff: std::time::Duration::from_millis(1),
        };
        let mut coordinator = CheckpointCoordinator::new(Arc::new(FailingStorage), retry);
        let err = coordinator
            .commit(&[snapshot("p0", 1)])
            .await
            .unwrap_err();
        match err {
            EngineError::SnapshotExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {}", other),
        }
    }
}
