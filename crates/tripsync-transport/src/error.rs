//! Transport error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tripsync_protocol::ProtocolError),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Connection manager is closed")]
    Closed,
}
