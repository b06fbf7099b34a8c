//! tripsync wire protocol
//!
//! JSON messages over a persistent WebSocket, one connection per
//! (trip, user). Every frame is an [`Envelope`] carrying a typed body,
//! the sender's identity and the sender's version-vector basis.

pub mod error;
pub mod message;

pub use error::{ProtocolError, Result};
pub use message::{
    ConflictData, ContentChangeData, CursorData, Envelope, JoinData, MessageBody, PermissionData,
    SyncData,
};
