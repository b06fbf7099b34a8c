//! tripsync checkpoint storage
//!
//! The seam toward the persistent document store: sessions are
//! checkpointed asynchronously after applied operations and re-seeded
//! from the last checkpoint on first join. Edit history beyond the
//! in-session log is deliberately not persisted here.

pub mod memory;

use async_trait::async_trait;
use tripsync_core::{SessionSnapshot, TripId};

/// Checkpoint store trait
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the resolved document state for a trip
    async fn checkpoint(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;

    /// Load the last checkpoint for a trip
    async fn load(&self, trip_id: &TripId) -> Result<Option<SessionSnapshot>, StoreError>;

    /// Drop a trip's checkpoint
    async fn delete(&self, trip_id: &TripId) -> Result<bool, StoreError>;

    /// Get store statistics
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub checkpoint_count: usize,
    pub total_size_bytes: usize,
}

pub use memory::MemoryStore;
