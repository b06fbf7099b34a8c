//! Per-trip document session state
//!
//! A `DocumentSession` holds the authoritative text, roster, operation log
//! and version vector for one trip. It is owned exclusively by the
//! `SessionRegistry`; nothing else mutates it.

use crate::conflict::{self, ConflictRecord, ConflictType, Resolution};
use crate::error::{Error, Result};
use crate::operation::{now_millis, Operation, TripId};
use crate::transform::transform;
use crate::version::{VersionVector, VersionVectorTracker};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// How long an empty session lingers before teardown
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// How many trailing log entries count as "recent" when a permission
/// change races an edit
const RECENT_EDIT_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub fn can_edit(&self) -> bool {
        matches!(self, Role::Owner | Role::Editor)
    }

    pub fn can_invite(&self) -> bool {
        matches!(self, Role::Owner)
    }
}

/// Live cursor position within the itinerary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Identity details supplied by the auth provider on join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Roster entry; survives leave so attribution and history remain intact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: Role,
    pub is_online: bool,
    pub last_seen: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// Per-capability id sets, kept in step with roles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_edit: HashSet<String>,
    pub can_comment: HashSet<String>,
    pub can_invite: HashSet<String>,
}

impl Permissions {
    fn grant(&mut self, user_id: &str, role: Role) {
        self.can_edit.remove(user_id);
        self.can_invite.remove(user_id);
        self.can_comment.insert(user_id.to_string());
        if role.can_edit() {
            self.can_edit.insert(user_id.to_string());
        }
        if role.can_invite() {
            self.can_invite.insert(user_id.to_string());
        }
    }
}

/// Result of pushing one operation through the pipeline
#[derive(Debug, Clone)]
pub struct Applied {
    pub op: Operation,
    pub conflicts: Vec<ConflictRecord>,
}

/// Checkpoint payload handed to the persistent document store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub trip_id: TripId,
    pub content: String,
    pub vector: VersionVector,
    pub updated_at: u64,
}

/// Authoritative state for one trip document
#[derive(Debug)]
pub struct DocumentSession {
    trip_id: TripId,
    content: String,
    collaborators: HashMap<String, Collaborator>,
    active: HashSet<String>,
    log: Vec<Operation>,
    tracker: VersionVectorTracker,
    permissions: Permissions,
    conflicts: Vec<ConflictRecord>,
    /// Set when the last collaborator leaves; cleared on rejoin
    empty_since: Option<Instant>,
}

impl DocumentSession {
    pub fn new(trip_id: TripId) -> Self {
        Self {
            trip_id,
            content: String::new(),
            collaborators: HashMap::new(),
            active: HashSet::new(),
            log: Vec::new(),
            tracker: VersionVectorTracker::new(),
            permissions: Permissions::default(),
            conflicts: Vec::new(),
            empty_since: None,
        }
    }

    /// Rebuild a session from a checkpoint
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let mut session = Self::new(snapshot.trip_id);
        session.content = snapshot.content;
        session.tracker = VersionVectorTracker::from_vector(&snapshot.vector);
        session
    }

    pub fn trip_id(&self) -> &TripId {
        &self.trip_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn vector(&self) -> VersionVector {
        self.tracker.vector()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            trip_id: self.trip_id.clone(),
            content: self.content.clone(),
            vector: self.tracker.vector(),
            updated_at: now_millis(),
        }
    }

    /// Add or reactivate a collaborator; the first joiner owns the trip
    pub fn join(&mut self, profile: CollaboratorProfile) -> Collaborator {
        self.empty_since = None;
        let first = self.collaborators.is_empty();
        self.active.insert(profile.id.clone());

        let entry = self
            .collaborators
            .entry(profile.id.clone())
            .and_modify(|c| {
                c.is_online = true;
                c.last_seen = now_millis();
                c.name = profile.name.clone();
                c.avatar = profile.avatar.clone();
            })
            .or_insert_with(|| Collaborator {
                id: profile.id.clone(),
                name: profile.name,
                email: profile.email,
                avatar: profile.avatar,
                role: if first { Role::Owner } else { Role::Editor },
                is_online: true,
                last_seen: now_millis(),
                cursor: None,
            });

        let snapshot = entry.clone();
        self.permissions.grant(&snapshot.id, snapshot.role);
        snapshot
    }

    /// Mark a collaborator offline; never removed, so attribution survives
    pub fn leave(&mut self, user_id: &str) -> Result<()> {
        let entry = self
            .collaborators
            .get_mut(user_id)
            .ok_or_else(|| Error::UnknownCollaborator(user_id.to_string()))?;
        entry.is_online = false;
        entry.last_seen = now_millis();
        entry.cursor = None;

        self.active.remove(user_id);
        if self.active.is_empty() {
            self.empty_since = Some(Instant::now());
        }
        Ok(())
    }

    /// Serialized pipeline: concurrency lookup, transform, conflict
    /// detection, apply, log append, vector update
    ///
    /// `basis` is the author's version vector at emission; log entries the
    /// author had not yet seen are the concurrent window.
    pub fn apply(&mut self, op: Operation, basis: &VersionVector) -> Result<Applied> {
        if !self.permissions.can_edit.contains(&op.author) {
            return Err(Error::PermissionDenied {
                user: op.author.clone(),
                action: "edit".into(),
            });
        }

        let recorded = self.tracker.get(&op.author);
        if op.seq <= recorded {
            return Err(Error::StaleOperation {
                author: op.author.clone(),
                seq: op.seq,
                recorded,
            });
        }

        let concurrent: Vec<Operation> = self
            .log
            .iter()
            .filter(|e| e.author != op.author && e.seq > basis.get(&e.author))
            .cloned()
            .collect();

        let records = conflict::detect(&op, &concurrent);
        let transformed = transform(op.clone(), &concurrent);

        if !transformed.is_noop() {
            transformed.apply(&mut self.content)?;
        }
        self.tracker.record(&op.author, op.seq)?;
        self.log.push(transformed.clone());

        if let Some(entry) = self.collaborators.get_mut(&op.author) {
            entry.last_seen = now_millis();
        }

        // Manual records stay pending until somebody settles them
        self.conflicts
            .extend(records.iter().filter(|r| r.resolution == Resolution::Manual).cloned());

        if !records.is_empty() {
            tracing::debug!(
                trip_id = %self.trip_id,
                author = %transformed.author,
                conflicts = records.len(),
                "Concurrent edits classified"
            );
        }

        Ok(Applied {
            op: transformed,
            conflicts: records,
        })
    }

    pub fn update_cursor(&mut self, user_id: &str, cursor: Cursor) -> Result<()> {
        let entry = self
            .collaborators
            .get_mut(user_id)
            .ok_or_else(|| Error::UnknownCollaborator(user_id.to_string()))?;
        entry.cursor = Some(cursor);
        entry.last_seen = now_millis();
        Ok(())
    }

    /// Change a collaborator's role
    ///
    /// Returns a permission-conflict record when the change races recent
    /// edits by the target, so the UI can surface what happened.
    pub fn update_permissions(
        &mut self,
        actor: &str,
        target: &str,
        role: Role,
    ) -> Result<Option<ConflictRecord>> {
        if !self.permissions.can_invite.contains(actor) {
            return Err(Error::PermissionDenied {
                user: actor.to_string(),
                action: "change permissions".into(),
            });
        }

        let entry = self
            .collaborators
            .get_mut(target)
            .ok_or_else(|| Error::UnknownCollaborator(target.to_string()))?;
        let downgraded = entry.role.can_edit() && !role.can_edit();
        entry.role = role;
        self.permissions.grant(target, role);

        if !downgraded {
            return Ok(None);
        }

        let racing: Vec<Operation> = self
            .log
            .iter()
            .rev()
            .take(RECENT_EDIT_WINDOW)
            .filter(|op| op.author == target)
            .cloned()
            .collect();

        if racing.is_empty() {
            return Ok(None);
        }

        let record = ConflictRecord::new(
            ConflictType::PermissionConflict,
            Resolution::Manual,
            racing,
        );
        self.conflicts.push(record.clone());
        Ok(Some(record))
    }

    /// Settle a pending conflict and archive it
    pub fn resolve_conflict(
        &mut self,
        conflict_id: &str,
        by: &str,
        resolution: Resolution,
    ) -> Result<ConflictRecord> {
        let idx = self
            .conflicts
            .iter()
            .position(|c| c.conflict_id == conflict_id)
            .ok_or_else(|| Error::ConflictNotFound(conflict_id.to_string()))?;
        let mut record = self.conflicts.remove(idx);
        record.resolve(by, resolution);
        Ok(record)
    }

    pub fn pending_conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn roster(&self) -> Vec<Collaborator> {
        let mut roster: Vec<Collaborator> = self.collaborators.values().cloned().collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        roster
    }

    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.get(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Empty and past the grace period: eligible for teardown
    pub fn is_expired(&self, grace: Duration) -> bool {
        match self.empty_since {
            Some(since) => self.active.is_empty() && since.elapsed() >= grace,
            None => false,
        }
    }
}
