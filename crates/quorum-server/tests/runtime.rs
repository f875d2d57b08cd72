//! Runtime tests: the async server loop over an in-memory transport.

use std::time::Duration;

use quorum_core::PeerId;
use quorum_harness::{Received, SimClient, SimEnv};
use quorum_server::{
    Delivery, MemoryStorage, MemoryTransport, Server, ServerConfig, ServerError, ServerEvent,
    ServerRuntimeConfig, SystemEnv,
};
use tempfile::tempdir;
use tokio::sync::mpsc;

#[tokio::test]
async fn run_loop_handshakes_and_delivers() {
    let (transport, mut outbound) = MemoryTransport::channel();
    let (server, mut deliveries) =
        Server::new(SystemEnv::new(), MemoryStorage::new(), transport, ServerConfig::default())
            .unwrap();
    let (events, inbound) = mpsc::channel(16);
    let running = tokio::spawn(server.run(inbound));

    let client = SimClient::new(SimEnv::with_seed(1)).unwrap();
    let (server_id, alice) = (PeerId::from("server"), PeerId::from("alice"));

    events
        .send(ServerEvent::FrameReceived { peer: alice.clone(), bytes: client.connect(&server_id).unwrap() })
        .await
        .unwrap();
    let complete = outbound.recv().await.unwrap();
    assert_eq!(complete.peer, alice);
    assert_eq!(client.receive(&server_id, &complete.bytes).unwrap(), Received::Connected);

    events
        .send(ServerEvent::FrameReceived {
            peer: alice.clone(),
            bytes: client.send(&server_id, b"ballot").unwrap(),
        })
        .await
        .unwrap();
    let delivery = deliveries.recv().await.unwrap();
    assert_eq!(delivery, Delivery { peer: alice.clone(), plaintext: b"ballot".to_vec() });

    events.send(ServerEvent::Send { peer: alice.clone(), plaintext: b"counted".to_vec() }).await.unwrap();
    let reply = outbound.recv().await.unwrap();
    assert_eq!(client.receive(&server_id, &reply.bytes).unwrap(), Received::Message(b"counted".to_vec()));

    drop(events);
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_event_does_not_stop_the_loop() {
    let (transport, mut outbound) = MemoryTransport::channel();
    let (server, _deliveries) =
        Server::new(SystemEnv::new(), MemoryStorage::new(), transport, ServerConfig::default())
            .unwrap();
    let (events, inbound) = mpsc::channel(16);
    let running = tokio::spawn(server.run(inbound));

    // No session with this peer: the error is logged, the loop continues
    events.send(ServerEvent::Send { peer: "nobody".into(), plaintext: vec![1] }).await.unwrap();
    events.send(ServerEvent::Connect { peer: "bob".into() }).await.unwrap();

    let initiate = outbound.recv().await.unwrap();
    assert_eq!(initiate.peer, PeerId::from("bob"));

    drop(events);
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn handle_returns_application_errors() {
    let (transport, _outbound) = MemoryTransport::channel();
    let (server, _deliveries) =
        Server::new(SystemEnv::new(), MemoryStorage::new(), transport, ServerConfig::default())
            .unwrap();

    let result = server.handle(ServerEvent::Send { peer: "nobody".into(), plaintext: vec![] }).await;
    assert!(matches!(result, Err(ServerError::Core(_))));
}

#[test]
fn zero_maintenance_interval_is_rejected() {
    let (transport, _outbound) = MemoryTransport::channel();
    let config = ServerConfig { maintenance_interval: Duration::ZERO, ..ServerConfig::default() };

    let result = Server::new(SystemEnv::new(), MemoryStorage::new(), transport, config);
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn open_keeps_identity_across_restarts() {
    let dir = tempdir().unwrap();
    let config = ServerRuntimeConfig {
        database_path: dir.path().join("quorum.redb"),
        ..ServerRuntimeConfig::default()
    };

    let first = {
        let (transport, _outbound) = MemoryTransport::channel();
        let (server, _deliveries) = Server::open(config.clone(), transport).unwrap();
        server.driver().engine().identity_key()
    };

    let (transport, _outbound) = MemoryTransport::channel();
    let (server, _deliveries) = Server::open(config, transport).unwrap();
    assert_eq!(server.driver().engine().identity_key(), first);
}
