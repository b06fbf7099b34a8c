//! Reconnecting client connection manager
//!
//! Owns the socket for one (trip, user) pair and supervises its whole
//! lifecycle: handshake, heartbeat, reconnect with backoff, shutdown.
//! Callers never touch the socket; they push envelopes in and subscribe
//! to [`ClientEvent`]s coming out.

use crate::backoff::ReconnectPolicy;
use crate::error::TransportError;
use crate::server::DEFAULT_HEARTBEAT;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use tripsync_core::{Cursor, Operation, Role, VersionVector};
use tripsync_protocol::{
    ContentChangeData, CursorData, Envelope, JoinData, MessageBody, PermissionData,
};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Events emitted to subscribers of a [`ConnectionManager`]
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    Received(Envelope),
    /// Reconnect budget spent; the manager will not try again
    HardDisconnect,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub trip_id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub policy: ReconnectPolicy,
    pub heartbeat: Duration,
}

impl ClientConfig {
    pub fn new(
        url: impl Into<String>,
        trip_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            trip_id: trip_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
            avatar: None,
            policy: ReconnectPolicy::default(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// Tracks unanswered pings; two in a row means the link is dead
#[derive(Debug)]
pub struct Heartbeat {
    outstanding: u32,
    limit: u32,
}

impl Heartbeat {
    pub fn new(limit: u32) -> Self {
        Self {
            outstanding: 0,
            limit,
        }
    }

    pub fn on_ping_sent(&mut self) {
        self.outstanding += 1;
    }

    pub fn on_pong(&mut self) {
        self.outstanding = 0;
    }

    pub fn is_dead(&self) -> bool {
        self.outstanding >= self.limit
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(2)
    }
}

enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Owned handle to a supervised WebSocket connection
pub struct ConnectionManager {
    config: ClientConfig,
    events: broadcast::Sender<ClientEvent>,
    outbound: mpsc::UnboundedSender<Envelope>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Spawn the supervisor and start connecting
    pub fn connect(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(supervise(
            config.clone(),
            events.clone(),
            outbound_rx,
            state_tx,
            shutdown_rx,
        ));

        Self {
            config,
            events,
            outbound: outbound_tx,
            state: state_rx,
            shutdown: shutdown_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue an edit; `basis` is this replica's vector at emission
    pub fn send_operation(
        &self,
        op: Operation,
        basis: VersionVector,
    ) -> Result<(), TransportError> {
        self.send(
            self.envelope(MessageBody::ContentChange(ContentChangeData { operation: op }))
                .with_version(basis),
        )
    }

    pub fn send_cursor(&self, cursor: Cursor) -> Result<(), TransportError> {
        self.send(self.envelope(MessageBody::CursorMove(CursorData { cursor })))
    }

    pub fn change_permissions(&self, target: &str, role: Role) -> Result<(), TransportError> {
        self.send(self.envelope(MessageBody::PermissionChange(PermissionData {
            target: target.to_string(),
            role,
        })))
    }

    /// Graceful shutdown: user-leave, close frame, no reconnect
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    fn envelope(&self, body: MessageBody) -> Envelope {
        Envelope::new(body, self.config.user_id.clone(), self.config.trip_id.clone())
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.outbound
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }
}

fn set_state(
    state: &watch::Sender<ConnectionState>,
    events: &broadcast::Sender<ClientEvent>,
    next: ConnectionState,
) {
    let _ = state.send(next);
    let _ = events.send(ClientEvent::StateChanged(next));
}

async fn supervise(
    config: ClientConfig,
    events: broadcast::Sender<ClientEvent>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = format!(
        "{}?tripId={}&userId={}",
        config.url, config.trip_id, config.user_id
    );
    let mut attempt = 0u32;

    loop {
        set_state(&state, &events, ConnectionState::Connecting);

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(trip_id = %config.trip_id, user = %config.user_id, "Connected");
                attempt = 0;
                set_state(&state, &events, ConnectionState::Connected);

                let end =
                    run_session(&config, ws, &events, &mut outbound, &mut shutdown).await;
                if matches!(end, SessionEnd::Shutdown) {
                    set_state(&state, &events, ConnectionState::Closed);
                    return;
                }
                set_state(&state, &events, ConnectionState::Reconnecting);
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                set_state(&state, &events, ConnectionState::Reconnecting);
            }
        }

        attempt += 1;
        match config.policy.delay(attempt) {
            Some(delay) => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        set_state(&state, &events, ConnectionState::Closed);
                        return;
                    }
                }
            }
            None => {
                warn!(attempts = attempt, "Reconnect budget spent, giving up");
                let _ = events.send(ClientEvent::HardDisconnect);
                set_state(&state, &events, ConnectionState::Closed);
                return;
            }
        }
    }
}

async fn run_session(
    config: &ClientConfig,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    events: &broadcast::Sender<ClientEvent>,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    // Handshake: announce ourselves so the hub replays state and roster
    let join = Envelope::new(
        MessageBody::UserJoin(JoinData {
            name: config.name.clone(),
            email: config.email.clone(),
            avatar: config.avatar.clone(),
            role: None,
        }),
        config.user_id.clone(),
        config.trip_id.clone(),
    );
    let Ok(text) = join.encode() else {
        return SessionEnd::ConnectionLost;
    };
    if write.send(Message::Text(text)).await.is_err() {
        return SessionEnd::ConnectionLost;
    }

    let mut heartbeat = Heartbeat::default();
    let mut ticker = tokio::time::interval(config.heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            Some(envelope) = outbound.recv() => {
                let Ok(text) = envelope.encode() else { continue };
                if write.send(Message::Text(text)).await.is_err() {
                    return SessionEnd::ConnectionLost;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Envelope::decode(&text) {
                            Ok(envelope) => {
                                if matches!(envelope.body, MessageBody::Pong) {
                                    heartbeat.on_pong();
                                } else {
                                    let _ = events.send(ClientEvent::Received(envelope));
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Dropping malformed frame from hub");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            return SessionEnd::ConnectionLost;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        // Close code 1000 is an intentional disconnect;
                        // anything else is a failure worth retrying
                        if frame.as_ref().map_or(false, |f| f.code == CloseCode::Normal) {
                            info!("Hub closed the connection");
                            return SessionEnd::Shutdown;
                        }
                        return SessionEnd::ConnectionLost;
                    }
                    None => {
                        return SessionEnd::ConnectionLost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        return SessionEnd::ConnectionLost;
                    }
                }
            }

            _ = ticker.tick() => {
                if heartbeat.is_dead() {
                    warn!("Missed pongs, treating connection as dead");
                    return SessionEnd::ConnectionLost;
                }
                let ping = Envelope::new(
                    MessageBody::Ping,
                    config.user_id.clone(),
                    config.trip_id.clone(),
                );
                let Ok(text) = ping.encode() else { continue };
                heartbeat.on_ping_sent();
                if write.send(Message::Text(text)).await.is_err() {
                    return SessionEnd::ConnectionLost;
                }
            }

            _ = shutdown.changed() => {
                let leave = Envelope::new(
                    MessageBody::UserLeave,
                    config.user_id.clone(),
                    config.trip_id.clone(),
                );
                if let Ok(text) = leave.encode() {
                    let _ = write.send(Message::Text(text)).await;
                }
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}
