//! End-to-end hub and client tests over a loopback socket

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tripsync_core::{Operation, SessionRegistry, TripId, VersionVector};
use tripsync_protocol::MessageBody;
use tripsync_store::MemoryStore;
use tripsync_transport::{
    ClientConfig, ClientEvent, CollabServer, ConnectionManager, ConnectionState,
};

const TRIP: &str = "trip:e2e";

async fn start_hub() -> (Arc<SessionRegistry>, String) {
    let registry = Arc::new(SessionRegistry::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = CollabServer::new(registry.clone(), addr).with_store(Arc::new(MemoryStore::new()));
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    (registry, format!("ws://{addr}/sync"))
}

fn config(url: &str, user: &str) -> ClientConfig {
    ClientConfig::new(
        url,
        TRIP,
        user,
        user.to_uppercase(),
        format!("{user}@example.com"),
    )
}

async fn recv_until<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_body(event: &ClientEvent, kind: &str) -> bool {
    matches!(event, ClientEvent::Received(envelope) if envelope.body.kind() == kind)
}

#[tokio::test(flavor = "multi_thread")]
async fn join_replays_state_and_roster() {
    let (_registry, url) = start_hub().await;

    let alice = ConnectionManager::connect(config(&url, "alice"));
    let mut rx = alice.subscribe();

    recv_until(&mut rx, |e| {
        matches!(e, ClientEvent::StateChanged(ConnectionState::Connected))
    })
    .await;

    let sync = recv_until(&mut rx, |e| is_body(e, "sync-state")).await;
    match sync {
        ClientEvent::Received(envelope) => match envelope.body {
            MessageBody::SyncState(data) => assert_eq!(data.content, ""),
            other => panic!("unexpected body: {other:?}"),
        },
        other => panic!("unexpected event: {other:?}"),
    }

    recv_until(&mut rx, |e| is_body(e, "user-join")).await;
    alice.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn edits_propagate_between_clients() {
    let (registry, url) = start_hub().await;

    let alice = ConnectionManager::connect(config(&url, "alice"));
    let mut alice_rx = alice.subscribe();
    recv_until(&mut alice_rx, |e| is_body(e, "sync-state")).await;

    let bob = ConnectionManager::connect(config(&url, "bob"));
    let mut bob_rx = bob.subscribe();
    recv_until(&mut bob_rx, |e| is_body(e, "sync-state")).await;

    // Alice sees bob arrive through the event bus
    recv_until(&mut alice_rx, |e| {
        matches!(e, ClientEvent::Received(envelope)
            if envelope.body.kind() == "user-join" && envelope.user_id == "bob")
    })
    .await;

    alice
        .send_operation(
            Operation::insert(0, "Day 1: Lisbon", "alice", 1),
            VersionVector::new(),
        )
        .unwrap();

    let change = recv_until(&mut bob_rx, |e| is_body(e, "content-change")).await;
    match change {
        ClientEvent::Received(envelope) => assert_eq!(envelope.user_id, "alice"),
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = registry.snapshot(&TripId::new(TRIP).unwrap()).unwrap();
    assert_eq!(snapshot.content, "Day 1: Lisbon");

    alice.close();
    bob.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_close_marks_offline() {
    let (registry, url) = start_hub().await;

    let alice = ConnectionManager::connect(config(&url, "alice"));
    let mut rx = alice.subscribe();
    recv_until(&mut rx, |e| is_body(e, "sync-state")).await;

    alice.close();
    recv_until(&mut rx, |e| {
        matches!(e, ClientEvent::StateChanged(ConnectionState::Closed))
    })
    .await;

    // Leave is processed by the hub shortly after the close frame
    let trip = TripId::new(TRIP).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let roster = registry.roster(&trip).unwrap();
            if roster.iter().any(|c| c.id == "alice" && !c.is_online) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("alice should be marked offline");
}
