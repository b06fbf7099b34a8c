//! WebSocket hub server

use crate::error::TransportError;
use crate::handler::ConnectionHandler;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::{coding::CloseCode, CloseFrame};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use tripsync_core::{SessionEvent, SessionRegistry, TripId};
use tripsync_protocol::{
    ConflictData, ContentChangeData, CursorData, Envelope, JoinData, MessageBody, PermissionData,
};
use tripsync_store::CheckpointStore;

/// Default client heartbeat period the server sizes its idle timeout from
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Sender id stamped on hub-originated envelopes
const HUB_USER: &str = "hub";

/// WebSocket hub for tripsync sessions
///
/// Clients connect with `?tripId=...&userId=...` in the URL; all further
/// identity travels in message envelopes and must match the handshake.
pub struct CollabServer {
    registry: Arc<SessionRegistry>,
    addr: SocketAddr,
    store: Option<Arc<dyn CheckpointStore>>,
    heartbeat: Duration,
}

impl CollabServer {
    pub fn new(registry: Arc<SessionRegistry>, addr: SocketAddr) -> Self {
        Self {
            registry,
            addr,
            store: None,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    /// Set the checkpoint store for persistence
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Start the hub server
    pub async fn run(&self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "tripsync hub listening");
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let registry = self.registry.clone();
                    let store = self.store.clone();
                    let heartbeat = self.heartbeat;

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, peer_addr, registry, store, heartbeat)
                                .await
                        {
                            error!(peer = %peer_addr, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        store: Option<Arc<dyn CheckpointStore>>,
        heartbeat: Duration,
    ) -> Result<(), TransportError> {
        let mut query = None;
        let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
            query = req.uri().query().map(str::to_string);
            Ok(resp)
        })
        .await?;
        let (mut write, mut read) = ws_stream.split();

        let query = query.unwrap_or_default();
        let (trip_id, user_id) = match handshake_identity(&query) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Rejecting handshake");
                let _ = write.send(Message::Close(None)).await;
                return Err(e);
            }
        };
        info!(peer = %peer_addr, trip_id = %trip_id, user = %user_id, "Client connected");

        // Re-seed from the last checkpoint before the first join
        if let Some(ref store) = store {
            if !registry.contains(&trip_id) {
                match store.load(&trip_id).await {
                    Ok(Some(snapshot)) => registry.seed(snapshot),
                    Ok(None) => {}
                    Err(e) => warn!(trip_id = %trip_id, error = %e, "Checkpoint load failed"),
                }
            }
        }

        let handler = ConnectionHandler::new(user_id.clone(), trip_id.clone(), registry.clone());
        let handler = match store {
            Some(s) => handler.with_store(s),
            None => handler,
        };
        let mut events = registry.subscribe();

        // A client that stops talking for two heartbeat periods is gone
        let idle_timeout = heartbeat * 2;
        let mut last_activity = Instant::now();
        let mut idle_check = tokio::time::interval(heartbeat);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_activity = Instant::now();
                            let outcome = handler.process(&text);
                            for reply in outcome.replies {
                                write.send(Message::Text(reply.encode()?)).await?;
                            }
                            if outcome.disconnect {
                                // Intentional: tell the client not to reconnect
                                let _ = write
                                    .send(Message::Close(Some(CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "session over".into(),
                                    })))
                                    .await;
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_activity = Instant::now();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_activity = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(user = %user_id, "Client disconnected");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol
                        }
                        Some(Err(e)) => {
                            error!(user = %user_id, error = %e, "Read error");
                            break;
                        }
                    }
                }

                result = events.recv() => {
                    match result {
                        Ok(event) => {
                            if event.trip_id() != &trip_id
                                || event.origin() == Some(user_id.as_str())
                            {
                                continue;
                            }
                            let envelope = event_envelope(event);
                            if let Err(e) = write.send(Message::Text(envelope.encode()?)).await {
                                error!(user = %user_id, error = %e, "Write error");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(user = %user_id, missed = n, "Client lagged behind events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }

                _ = idle_check.tick() => {
                    if last_activity.elapsed() >= idle_timeout {
                        warn!(user = %user_id, "Idle timeout, forcing leave");
                        break;
                    }
                }
            }
        }

        handler.cleanup();
        debug!(user = %user_id, "Connection closed");
        Ok(())
    }
}

/// Pull `tripId` and `userId` out of the handshake query string
fn handshake_identity(query: &str) -> Result<(TripId, String), TransportError> {
    let trip = query_param(query, "tripId")
        .ok_or_else(|| TransportError::Handshake("missing tripId".into()))?;
    let user = query_param(query, "userId")
        .ok_or_else(|| TransportError::Handshake("missing userId".into()))?;
    let trip_id =
        TripId::new(&trip).map_err(|e| TransportError::Handshake(format!("bad tripId: {e}")))?;
    Ok((trip_id, user))
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

/// Map a bus event onto the wire envelope delivered to subscribers
fn event_envelope(event: SessionEvent) -> Envelope {
    match event {
        SessionEvent::CollaboratorJoined { trip_id, collaborator } => Envelope::new(
            MessageBody::UserJoin(JoinData::from(&collaborator)),
            collaborator.id,
            trip_id.as_str(),
        ),
        SessionEvent::CollaboratorLeft { trip_id, user_id } => {
            Envelope::new(MessageBody::UserLeave, user_id, trip_id.as_str())
        }
        SessionEvent::CursorMoved { trip_id, user_id, cursor } => Envelope::new(
            MessageBody::CursorMove(CursorData { cursor }),
            user_id,
            trip_id.as_str(),
        ),
        SessionEvent::ContentChanged { trip_id, op } => {
            let author = op.author.clone();
            Envelope::new(
                MessageBody::ContentChange(ContentChangeData { operation: op }),
                author,
                trip_id.as_str(),
            )
        }
        SessionEvent::ConflictDetected { trip_id, record } => Envelope::new(
            MessageBody::ConflictDetected(ConflictData { conflict: record }),
            HUB_USER,
            trip_id.as_str(),
        ),
        SessionEvent::PermissionChanged { trip_id, actor, target, role } => Envelope::new(
            MessageBody::PermissionChange(PermissionData { target, role }),
            actor,
            trip_id.as_str(),
        ),
    }
}
