//! tripsync Core - OT engine and session management
//!
//! This crate provides the core functionality for tripsync:
//! - Operational transformation over concurrent itinerary edits
//! - Version-vector causal ordering per author
//! - Conflict detection, classification and resolution records
//! - Per-trip document sessions behind a serializing registry

pub mod conflict;
pub mod error;
pub mod operation;
pub mod registry;
pub mod session;
pub mod transform;
pub mod version;

pub use conflict::{ConflictRecord, ConflictType, Resolution};
pub use error::{Error, Result};
pub use operation::{now_millis, OpKind, Operation, TripId};
pub use registry::{RegistryStats, SessionEvent, SessionRegistry};
pub use session::{
    Applied, Collaborator, CollaboratorProfile, Cursor, DocumentSession, Permissions, Role,
    SessionSnapshot, DEFAULT_GRACE_PERIOD,
};
pub use version::{VersionVector, VersionVectorTracker};
