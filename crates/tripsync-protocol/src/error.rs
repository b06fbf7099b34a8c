//! Protocol error types

use thiserror::Error;

/// Wire protocol errors
///
/// A malformed or unknown message is a protocol error: the frame is
/// logged and dropped, and repeated offenders get disconnected.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
