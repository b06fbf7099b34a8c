//! In-memory checkpoint store

use crate::{CheckpointStore, StoreError, StoreStats};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tripsync_core::{SessionSnapshot, TripId};

/// In-memory checkpoint store
///
/// Fast, volatile storage suitable for development and single-node
/// deployments. Checkpoints are lost when the process exits.
pub struct MemoryStore {
    data: DashMap<String, Vec<u8>>,
    total_size: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            total_size: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn checkpoint(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let key = snapshot.trip_id.as_str().to_string();
        if let Some(existing) = self.data.get(&key) {
            self.total_size.fetch_sub(existing.len(), Ordering::Relaxed);
        }
        self.total_size.fetch_add(bytes.len(), Ordering::Relaxed);

        self.data.insert(key, bytes);
        Ok(())
    }

    async fn load(&self, trip_id: &TripId) -> Result<Option<SessionSnapshot>, StoreError> {
        match self.data.get(trip_id.as_str()) {
            Some(entry) => {
                let snapshot: SessionSnapshot = serde_json::from_slice(entry.value())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, trip_id: &TripId) -> Result<bool, StoreError> {
        match self.data.remove(trip_id.as_str()) {
            Some((_, bytes)) => {
                self.total_size.fetch_sub(bytes.len(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            checkpoint_count: self.data.len(),
            total_size_bytes: self.total_size.load(Ordering::Relaxed),
        })
    }
}
