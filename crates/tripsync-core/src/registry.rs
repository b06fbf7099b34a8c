//! Session registry - owns every document session and its lifecycle

use crate::conflict::{ConflictRecord, Resolution};
use crate::error::{Error, Result};
use crate::operation::{Operation, TripId};
use crate::session::{
    Applied, Collaborator, CollaboratorProfile, Cursor, DocumentSession, Role, SessionSnapshot,
    DEFAULT_GRACE_PERIOD,
};
use crate::version::VersionVector;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Domain event fanned out to every subscriber
///
/// Replaces per-callback handlers: any number of listeners can subscribe
/// without overwriting each other. Events carry the originating user so
/// transports can suppress the echo back to the sender.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    CollaboratorJoined {
        trip_id: TripId,
        collaborator: Collaborator,
    },
    CollaboratorLeft {
        trip_id: TripId,
        user_id: String,
    },
    CursorMoved {
        trip_id: TripId,
        user_id: String,
        cursor: Cursor,
    },
    ContentChanged {
        trip_id: TripId,
        op: Operation,
    },
    ConflictDetected {
        trip_id: TripId,
        record: ConflictRecord,
    },
    PermissionChanged {
        trip_id: TripId,
        actor: String,
        target: String,
        role: Role,
    },
}

impl SessionEvent {
    pub fn trip_id(&self) -> &TripId {
        match self {
            SessionEvent::CollaboratorJoined { trip_id, .. }
            | SessionEvent::CollaboratorLeft { trip_id, .. }
            | SessionEvent::CursorMoved { trip_id, .. }
            | SessionEvent::ContentChanged { trip_id, .. }
            | SessionEvent::ConflictDetected { trip_id, .. }
            | SessionEvent::PermissionChanged { trip_id, .. } => trip_id,
        }
    }

    /// The user whose action produced this event, for echo suppression
    pub fn origin(&self) -> Option<&str> {
        match self {
            SessionEvent::CollaboratorJoined { collaborator, .. } => Some(&collaborator.id),
            SessionEvent::CollaboratorLeft { user_id, .. } => Some(user_id),
            SessionEvent::CursorMoved { user_id, .. } => Some(user_id),
            SessionEvent::ContentChanged { op, .. } => Some(&op.author),
            SessionEvent::ConflictDetected { .. } => None,
            SessionEvent::PermissionChanged { actor, .. } => Some(actor),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub session_count: usize,
    pub subscriber_count: usize,
}

/// One slot per trip; the mutex serializes all mutation for that document
struct SessionSlot {
    state: Mutex<DocumentSession>,
}

/// Owns one `DocumentSession` per trip and serializes operation
/// application per document; independent trips proceed in parallel
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionSlot>>,
    events: broadcast::Sender<SessionEvent>,
    grace: Duration,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace: Duration) -> Self {
        let (events, _) = broadcast::channel(10000);
        Self {
            sessions: DashMap::new(),
            events,
            grace,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn contains(&self, trip_id: &TripId) -> bool {
        self.sessions.contains_key(trip_id.as_str())
    }

    fn slot(&self, trip_id: &TripId) -> Result<Arc<SessionSlot>> {
        self.sessions
            .get(trip_id.as_str())
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::SessionNotFound(trip_id.to_string()))
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Seed a session from a checkpoint; no-op if the session already exists
    pub fn seed(&self, snapshot: SessionSnapshot) {
        let key = snapshot.trip_id.as_str().to_string();
        self.sessions.entry(key).or_insert_with(|| {
            debug!(trip_id = %snapshot.trip_id, "Seeding session from checkpoint");
            Arc::new(SessionSlot {
                state: Mutex::new(DocumentSession::from_snapshot(snapshot)),
            })
        });
    }

    /// Add or reactivate a collaborator, creating the session lazily
    ///
    /// Returns the roster snapshot after the join.
    pub fn join(&self, trip_id: &TripId, profile: CollaboratorProfile) -> Vec<Collaborator> {
        let slot = self
            .sessions
            .entry(trip_id.as_str().to_string())
            .or_insert_with(|| {
                info!(trip_id = %trip_id, "Creating session");
                Arc::new(SessionSlot {
                    state: Mutex::new(DocumentSession::new(trip_id.clone())),
                })
            })
            .value()
            .clone();

        let (collaborator, roster) = {
            let mut session = slot.state.lock();
            let collaborator = session.join(profile);
            (collaborator, session.roster())
        };

        info!(trip_id = %trip_id, user = %collaborator.id, "Collaborator joined");
        self.emit(SessionEvent::CollaboratorJoined {
            trip_id: trip_id.clone(),
            collaborator,
        });
        roster
    }

    /// Mark a collaborator offline; starts the teardown grace timer when
    /// the roster empties
    pub fn leave(&self, trip_id: &TripId, user_id: &str) -> Result<()> {
        let slot = self.slot(trip_id)?;
        slot.state.lock().leave(user_id)?;

        info!(trip_id = %trip_id, user = %user_id, "Collaborator left");
        self.emit(SessionEvent::CollaboratorLeft {
            trip_id: trip_id.clone(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    /// Push an operation through the per-trip serialized pipeline
    pub fn apply_operation(
        &self,
        trip_id: &TripId,
        op: Operation,
        basis: &VersionVector,
    ) -> Result<Applied> {
        let slot = self.slot(trip_id)?;
        let applied = slot.state.lock().apply(op, basis)?;

        self.emit(SessionEvent::ContentChanged {
            trip_id: trip_id.clone(),
            op: applied.op.clone(),
        });
        for record in &applied.conflicts {
            self.emit(SessionEvent::ConflictDetected {
                trip_id: trip_id.clone(),
                record: record.clone(),
            });
        }
        Ok(applied)
    }

    /// Update a live cursor; does not touch the operation log
    pub fn update_cursor(&self, trip_id: &TripId, user_id: &str, cursor: Cursor) -> Result<()> {
        let slot = self.slot(trip_id)?;
        slot.state.lock().update_cursor(user_id, cursor.clone())?;

        self.emit(SessionEvent::CursorMoved {
            trip_id: trip_id.clone(),
            user_id: user_id.to_string(),
            cursor,
        });
        Ok(())
    }

    /// Change a collaborator's role; emits a permission-conflict when the
    /// change races recent edits by the target
    pub fn update_permissions(
        &self,
        trip_id: &TripId,
        actor: &str,
        target: &str,
        role: Role,
    ) -> Result<Option<ConflictRecord>> {
        let slot = self.slot(trip_id)?;
        let record = slot.state.lock().update_permissions(actor, target, role)?;

        self.emit(SessionEvent::PermissionChanged {
            trip_id: trip_id.clone(),
            actor: actor.to_string(),
            target: target.to_string(),
            role,
        });
        if let Some(ref record) = record {
            self.emit(SessionEvent::ConflictDetected {
                trip_id: trip_id.clone(),
                record: record.clone(),
            });
        }
        Ok(record)
    }

    /// Settle a pending conflict
    pub fn resolve_conflict(
        &self,
        trip_id: &TripId,
        conflict_id: &str,
        by: &str,
        resolution: Resolution,
    ) -> Result<ConflictRecord> {
        let slot = self.slot(trip_id)?;
        let record = slot.state.lock().resolve_conflict(conflict_id, by, resolution)?;
        Ok(record)
    }

    pub fn roster(&self, trip_id: &TripId) -> Result<Vec<Collaborator>> {
        let slot = self.slot(trip_id)?;
        let roster = slot.state.lock().roster();
        Ok(roster)
    }

    /// Checkpoint payload for the persistent store
    pub fn snapshot(&self, trip_id: &TripId) -> Result<SessionSnapshot> {
        let slot = self.slot(trip_id)?;
        let snapshot = slot.state.lock().snapshot();
        Ok(snapshot)
    }

    /// Tear down sessions that sat empty past the grace period
    ///
    /// Returns the number of sessions removed.
    pub fn gc(&self) -> usize {
        let mut to_remove = Vec::new();
        for entry in self.sessions.iter() {
            if entry.value().state.lock().is_expired(self.grace) {
                to_remove.push(entry.key().clone());
            }
        }

        let count = to_remove.len();
        for key in to_remove {
            debug!(trip_id = %key, "Tearing down idle session");
            self.sessions.remove(&key);
        }
        count
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            session_count: self.sessions.len(),
            subscriber_count: self.events.receiver_count(),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;

    fn profile(id: &str) -> CollaboratorProfile {
        CollaboratorProfile {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{id}@example.com"),
            avatar: None,
        }
    }

    fn trip(id: &str) -> TripId {
        TripId::new(id).unwrap()
    }

    #[test]
    fn test_join_creates_lazily() {
        let registry = SessionRegistry::new();
        let id = trip("trip:rome");
        assert!(!registry.contains(&id));

        let roster = registry.join(&id, profile("alice"));
        assert!(registry.contains(&id));
        assert_eq!(roster.len(), 1);
        assert_eq!(registry.stats().session_count, 1);
    }

    #[test]
    fn test_apply_requires_session() {
        let registry = SessionRegistry::new();
        let err = registry
            .apply_operation(
                &trip("trip:none"),
                Operation::insert(0, "x", "alice", 1),
                &VersionVector::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[test]
    fn test_events_fan_out() {
        let registry = SessionRegistry::new();
        let id = trip("trip:1");
        let mut rx = registry.subscribe();

        registry.join(&id, profile("alice"));
        registry
            .apply_operation(&id, Operation::insert(0, "hi", "alice", 1), &VersionVector::new())
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::CollaboratorJoined { .. }
        ));
        match rx.try_recv().unwrap() {
            SessionEvent::ContentChanged { op, .. } => assert_eq!(op.author, "alice"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_event_origin_for_echo_suppression() {
        let registry = SessionRegistry::new();
        let id = trip("trip:1");
        let mut rx = registry.subscribe();
        registry.join(&id, profile("alice"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin(), Some("alice"));
        assert_eq!(event.trip_id().as_str(), "trip:1");
    }

    #[test]
    fn test_gc_removes_expired_sessions() {
        let registry = SessionRegistry::with_grace_period(Duration::ZERO);
        let id = trip("trip:1");
        let keep = trip("trip:2");

        registry.join(&id, profile("alice"));
        registry.join(&keep, profile("bob"));
        registry.leave(&id, "alice").unwrap();

        assert_eq!(registry.gc(), 1);
        assert!(!registry.contains(&id));
        assert!(registry.contains(&keep));
    }

    #[test]
    fn test_rejoin_cancels_teardown() {
        let registry = SessionRegistry::with_grace_period(Duration::ZERO);
        let id = trip("trip:1");

        registry.join(&id, profile("alice"));
        registry.leave(&id, "alice").unwrap();
        registry.join(&id, profile("alice"));

        assert_eq!(registry.gc(), 0);
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_resolve_conflict_through_registry() {
        let registry = SessionRegistry::new();
        let id = trip("trip:1");
        registry.join(&id, profile("alice"));
        registry.join(&id, profile("bob"));

        let basis = VersionVector::new();
        registry
            .apply_operation(&id, Operation::insert(0, "a fully planned day", "alice", 1), &basis)
            .unwrap();
        let applied = registry
            .apply_operation(&id, Operation::insert(0, "another whole schedule", "bob", 1), &basis)
            .unwrap();
        let pending = &applied.conflicts[0];

        let resolved = registry
            .resolve_conflict(&id, &pending.conflict_id, "alice", Resolution::Merge)
            .unwrap();
        assert!(resolved.is_resolved());

        // Already archived: settling it again is an error
        let err = registry
            .resolve_conflict(&id, &pending.conflict_id, "alice", Resolution::Merge)
            .unwrap_err();
        assert!(matches!(err, Error::ConflictNotFound(_)));
    }

    #[test]
    fn test_seed_then_join_keeps_content() {
        let registry = SessionRegistry::new();
        let id = trip("trip:1");

        registry.seed(SessionSnapshot {
            trip_id: id.clone(),
            content: "Day 1: Lisbon".into(),
            vector: [("alice".to_string(), 4)].into_iter().collect(),
            updated_at: 0,
        });
        registry.join(&id, profile("bob"));

        let snapshot = registry.snapshot(&id).unwrap();
        assert_eq!(snapshot.content, "Day 1: Lisbon");
        assert_eq!(snapshot.vector.get("alice"), 4);
    }
}
