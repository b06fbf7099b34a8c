//! Per-connection message routing

use crate::fault::FaultBudget;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use tripsync_core::{CollaboratorProfile, Operation, SessionRegistry, TripId, VersionVector};
use tripsync_protocol::{Envelope, JoinData, MessageBody, SyncData};
use tripsync_store::CheckpointStore;

/// What the transport loop should do with a processed frame
#[derive(Debug, Default)]
pub struct Outcome {
    pub replies: Vec<Envelope>,
    pub disconnect: bool,
}

impl Outcome {
    fn reply(envelope: Envelope) -> Self {
        Self {
            replies: vec![envelope],
            disconnect: false,
        }
    }

    fn disconnect() -> Self {
        Self {
            replies: Vec::new(),
            disconnect: true,
        }
    }
}

/// Routes decoded frames from one client into the session registry
///
/// The handler never writes to the socket itself; it returns direct
/// replies in the [`Outcome`] and everything roster-wide travels through
/// the registry's event bus.
pub struct ConnectionHandler {
    user_id: String,
    trip_id: TripId,
    registry: Arc<SessionRegistry>,
    store: Option<Arc<dyn CheckpointStore>>,
    faults: FaultBudget,
    joined: AtomicBool,
}

impl ConnectionHandler {
    pub fn new(user_id: String, trip_id: TripId, registry: Arc<SessionRegistry>) -> Self {
        Self {
            user_id,
            trip_id,
            registry,
            store: None,
            faults: FaultBudget::default(),
            joined: AtomicBool::new(false),
        }
    }

    /// Set the checkpoint store for persistence
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn has_joined(&self) -> bool {
        self.joined.load(Ordering::Relaxed)
    }

    /// Process one text frame
    pub fn process(&self, text: &str) -> Outcome {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "Dropping malformed frame");
                return self.fault();
            }
        };

        if envelope.user_id != self.user_id || envelope.trip_id != self.trip_id.as_str() {
            warn!(
                user = %self.user_id,
                claimed_user = %envelope.user_id,
                claimed_trip = %envelope.trip_id,
                "Frame identity does not match connection"
            );
            return self.fault();
        }

        let basis = envelope.basis();
        match envelope.body {
            MessageBody::UserJoin(data) => self.handle_join(data),
            MessageBody::UserLeave => self.handle_leave(),
            MessageBody::CursorMove(data) => {
                if let Err(e) = self
                    .registry
                    .update_cursor(&self.trip_id, &self.user_id, data.cursor)
                {
                    warn!(user = %self.user_id, error = %e, "Cursor update rejected");
                }
                Outcome::default()
            }
            MessageBody::ContentChange(data) => self.handle_content(data.operation, basis),
            MessageBody::PermissionChange(data) => {
                match self.registry.update_permissions(
                    &self.trip_id,
                    &self.user_id,
                    &data.target,
                    data.role,
                ) {
                    Ok(_) => self.checkpoint_async(),
                    Err(e) => {
                        warn!(user = %self.user_id, error = %e, "Permission change rejected")
                    }
                }
                Outcome::default()
            }
            MessageBody::Ping => Outcome::reply(Envelope::new(
                MessageBody::Pong,
                self.user_id.clone(),
                self.trip_id.as_str(),
            )),
            MessageBody::Pong => Outcome::default(),
            body @ (MessageBody::ConflictDetected(_) | MessageBody::SyncState(_)) => {
                warn!(user = %self.user_id, kind = %body.kind(), "Client sent hub-only message");
                self.fault()
            }
        }
    }

    /// Mark the collaborator offline; called by the transport loop on
    /// socket close and on idle timeout
    pub fn cleanup(&self) {
        if !self.joined.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.registry.leave(&self.trip_id, &self.user_id) {
            debug!(user = %self.user_id, error = %e, "Leave on cleanup failed");
        }
        self.checkpoint_async();
    }

    fn handle_join(&self, data: JoinData) -> Outcome {
        let roster = self.registry.join(
            &self.trip_id,
            CollaboratorProfile {
                id: self.user_id.clone(),
                name: data.name,
                email: data.email,
                avatar: data.avatar,
            },
        );
        self.joined.store(true, Ordering::Relaxed);

        // Current document text first, then the roster, so the client
        // renders presence against the right content
        let mut replies = Vec::with_capacity(roster.len() + 1);
        replies.extend(self.sync_state_reply());
        for collaborator in &roster {
            replies.push(Envelope::new(
                MessageBody::UserJoin(JoinData::from(collaborator)),
                collaborator.id.clone(),
                self.trip_id.as_str(),
            ));
        }

        Outcome {
            replies,
            disconnect: false,
        }
    }

    fn handle_leave(&self) -> Outcome {
        self.cleanup();
        Outcome::disconnect()
    }

    fn handle_content(&self, op: Operation, basis: VersionVector) -> Outcome {
        match self.registry.apply_operation(&self.trip_id, op, &basis) {
            Ok(applied) => {
                debug!(
                    user = %self.user_id,
                    seq = applied.op.seq,
                    conflicts = applied.conflicts.len(),
                    "Operation applied"
                );
                self.checkpoint_async();
                Outcome::default()
            }
            Err(e @ tripsync_core::Error::StaleOperation { .. }) => {
                // The client replayed history it already sent: it is
                // desynced and needs the authoritative state to recover
                warn!(user = %self.user_id, error = %e, "Stale operation, resyncing client");
                Outcome {
                    replies: self.sync_state_reply().into_iter().collect(),
                    disconnect: false,
                }
            }
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "Operation rejected");
                Outcome::default()
            }
        }
    }

    /// Authoritative document text and vector for this trip
    fn sync_state_reply(&self) -> Option<Envelope> {
        let snapshot = self.registry.snapshot(&self.trip_id).ok()?;
        Some(
            Envelope::new(
                MessageBody::SyncState(SyncData {
                    content: snapshot.content,
                }),
                self.user_id.clone(),
                self.trip_id.as_str(),
            )
            .with_version(snapshot.vector),
        )
    }

    /// Checkpoint the session off the hot path
    fn checkpoint_async(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Ok(snapshot) = self.registry.snapshot(&self.trip_id) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = store.checkpoint(&snapshot).await {
                warn!(trip_id = %snapshot.trip_id, error = %e, "Checkpoint failed");
            }
        });
    }

    fn fault(&self) -> Outcome {
        if self.faults.record() {
            warn!(user = %self.user_id, "Fault budget exhausted, disconnecting");
            self.cleanup();
            Outcome::disconnect()
        } else {
            Outcome::default()
        }
    }
}
