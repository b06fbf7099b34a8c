//! Error types for tripsync Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid trip ID: {0}")]
    InvalidTripId(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Stale operation from {author}: seq {seq} <= recorded {recorded}")]
    StaleOperation {
        author: String,
        seq: u64,
        recorded: u64,
    },

    #[error("Unknown collaborator: {0}")]
    UnknownCollaborator(String),

    #[error("Permission denied: {user} cannot {action}")]
    PermissionDenied { user: String, action: String },

    #[error("Position out of bounds: {position} exceeds document length {len}")]
    OutOfBounds { position: usize, len: usize },

    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),
}

/// Result type alias for tripsync Core operations
pub type Result<T> = std::result::Result<T, Error>;
