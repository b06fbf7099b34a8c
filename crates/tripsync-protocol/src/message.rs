//! Message envelope and payload types

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use tripsync_core::{
    now_millis, Collaborator, ConflictRecord, Cursor, Operation, Role, VersionVector,
};

/// Typed message body; the `type` tag and `data` payload on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum MessageBody {
    UserJoin(JoinData),
    UserLeave,
    CursorMove(CursorData),
    ContentChange(ContentChangeData),
    ConflictDetected(ConflictData),
    PermissionChange(PermissionData),
    SyncState(SyncData),
    Ping,
    Pong,
}

impl MessageBody {
    /// Wire name of this message type
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::UserJoin(_) => "user-join",
            MessageBody::UserLeave => "user-leave",
            MessageBody::CursorMove(_) => "cursor-move",
            MessageBody::ContentChange(_) => "content-change",
            MessageBody::ConflictDetected(_) => "conflict-detected",
            MessageBody::PermissionChange(_) => "permission-change",
            MessageBody::SyncState(_) => "sync-state",
            MessageBody::Ping => "ping",
            MessageBody::Pong => "pong",
        }
    }
}

/// Profile details carried on join; `role` is filled in by the hub when
/// replaying the roster to a newly connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl From<&Collaborator> for JoinData {
    fn from(collaborator: &Collaborator) -> Self {
        Self {
            name: collaborator.name.clone(),
            email: collaborator.email.clone(),
            avatar: collaborator.avatar.clone(),
            role: Some(collaborator.role),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorData {
    pub cursor: Cursor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChangeData {
    pub operation: Operation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub conflict: ConflictRecord,
}

impl PartialEq for ConflictData {
    fn eq(&self, other: &Self) -> bool {
        self.conflict.conflict_id == other.conflict.conflict_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionData {
    pub target: String,
    pub role: Role,
}

/// Full document state, pushed by the hub right after a join so the
/// client starts from the checkpointed text instead of an empty buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    pub content: String,
}

/// Wire envelope: `{type, userId, tripId, timestamp, data, version}`
///
/// `version` is the sender's version-vector snapshot at emission and is
/// the causal basis used by the hub's concurrency lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub body: MessageBody,
    pub user_id: String,
    pub trip_id: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionVector>,
}

impl Envelope {
    pub fn new(body: MessageBody, user_id: impl Into<String>, trip_id: impl Into<String>) -> Self {
        Self {
            body,
            user_id: user_id.into(),
            trip_id: trip_id.into(),
            timestamp: now_millis(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: VersionVector) -> Self {
        self.version = Some(version);
        self
    }

    /// Sender's causal basis, empty when omitted
    pub fn basis(&self) -> VersionVector {
        self.version.clone().unwrap_or_default()
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }

    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsync_core::OpKind;

    #[test]
    fn test_content_change_roundtrip() {
        let envelope = Envelope::new(
            MessageBody::ContentChange(ContentChangeData {
                operation: Operation::insert(4, "Day 2: Rome", "alice", 3),
            }),
            "alice",
            "trip:rome",
        )
        .with_version([("alice".to_string(), 2)].into_iter().collect());

        let text = envelope.encode().unwrap();
        assert!(text.contains("\"type\":\"content-change\""));
        assert!(text.contains("\"userId\":\"alice\""));
        assert!(text.contains("\"tripId\":\"trip:rome\""));

        let back = Envelope::decode(&text).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.basis().get("alice"), 2);
        match back.body {
            MessageBody::ContentChange(data) => {
                assert!(matches!(data.operation.kind, OpKind::Insert { .. }));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_ping_is_minimal() {
        let envelope = Envelope::new(MessageBody::Ping, "alice", "trip:1");
        let text = envelope.encode().unwrap();
        assert!(text.contains("\"type\":\"ping\""));
        assert!(!text.contains("\"data\""));

        let back = Envelope::decode(&text).unwrap();
        assert_eq!(back.body, MessageBody::Ping);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = Envelope::decode(
            r#"{"type":"teleport","userId":"a","tripId":"t","timestamp":0}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let err = Envelope::decode(r#"{"type":"ping","timestamp":0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_kebab_case_kinds() {
        let join = MessageBody::UserJoin(JoinData {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            avatar: None,
            role: None,
        });
        assert_eq!(join.kind(), "user-join");

        let text = Envelope::new(join, "alice", "trip:1").encode().unwrap();
        assert!(text.contains("\"type\":\"user-join\""));
    }

    #[test]
    fn test_malformed_operation_in_body() {
        // insert without content must fail at decode, not at apply time
        let err = Envelope::decode(
            r#"{"type":"content-change","data":{"operation":{"operation":"insert","position":0,"author":"a","seq":1,"timestamp":0}},"userId":"a","tripId":"t","timestamp":0}"#,
        );
        assert!(err.is_err());
    }
}
