//! Conflict detection and classification over concurrent edits

use crate::operation::{now_millis, OpKind, Operation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Both sides inserted at least this many characters at the identical
/// position before an automatic merge is considered unsafe
const HEAVY_EDIT_MIN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    ConcurrentEdit,
    DeletionConflict,
    PermissionConflict,
}

/// How a conflict was (or is to be) settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Auto-resolved through the transform rules
    Merge,
    /// The offending operation was not applied
    Reject,
    /// Needs UI-mediated resolution; never silently dropped
    Manual,
}

/// A flagged set of operations whose merge needs attention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub conflict_id: String,
    pub conflict_type: ConflictType,
    pub participants: Vec<String>,
    pub changes: Vec<Operation>,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

impl ConflictRecord {
    pub fn new(conflict_type: ConflictType, resolution: Resolution, changes: Vec<Operation>) -> Self {
        let mut participants: Vec<String> =
            changes.iter().map(|op| op.author.clone()).collect();
        participants.dedup();

        Self {
            conflict_id: Uuid::new_v4().to_string(),
            conflict_type,
            participants,
            changes,
            resolution,
            resolved_by: None,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Mark the record settled
    pub fn resolve(&mut self, by: impl Into<String>, resolution: Resolution) {
        self.resolution = resolution;
        self.resolved_by = Some(by.into());
        self.resolved_at = Some(now_millis());
    }
}

/// Whether the affected ranges of two operations intersect
///
/// Retains touch nothing and never conflict.
pub fn ranges_overlap(a: &Operation, b: &Operation) -> bool {
    if a.is_noop() || b.is_noop() {
        return false;
    }
    !(a.end() <= b.position || b.end() <= a.position)
}

/// Classify conflicts between an incoming operation and the concurrent
/// window it is being transformed against
///
/// Overlapping deletes auto-merge through the overlap rules; any other
/// overlapping pair is a concurrent edit. A merge is flagged `Manual`
/// only when both sides heavily edited the exact same spot, where an
/// automatic interleave would silently bury one author's intent.
pub fn detect(incoming: &Operation, concurrent: &[Operation]) -> Vec<ConflictRecord> {
    concurrent
        .iter()
        .filter(|other| other.author != incoming.author)
        .filter(|other| ranges_overlap(incoming, other))
        .map(|other| {
            let conflict_type = match (&incoming.kind, &other.kind) {
                (OpKind::Delete { .. }, OpKind::Delete { .. }) => ConflictType::DeletionConflict,
                _ => ConflictType::ConcurrentEdit,
            };
            let resolution = if needs_manual(incoming, other) {
                Resolution::Manual
            } else {
                Resolution::Merge
            };
            ConflictRecord::new(
                conflict_type,
                resolution,
                vec![incoming.clone(), other.clone()],
            )
        })
        .collect()
}

fn needs_manual(a: &Operation, b: &Operation) -> bool {
    matches!(
        (&a.kind, &b.kind),
        (OpKind::Insert { .. }, OpKind::Insert { .. })
    ) && a.position == b.position
        && a.len() >= HEAVY_EDIT_MIN
        && b.len() >= HEAVY_EDIT_MIN
}
