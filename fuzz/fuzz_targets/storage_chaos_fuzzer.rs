//! Fuzz target for ServerDriver under storage failures
//!
//! Uses ChaoticStorage to inject I/O errors at configurable rates while
//! clients exchange messages with the server.
//!
//! # Invariants
//!
//! - Storage errors surface as `Persistence` frames or errors, never panics
//! - In-memory sessions keep working through any run of failures
//! - After healing, one maintenance pass leaves nothing dirty
//! - After healing, a restarted driver resumes every session

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quorum_core::{ErrorKind, Frame, PeerId};
use quorum_harness::{Received, SimClient, SimEnv};
use quorum_server::{
    ChaoticStorage, MemoryStorage, ServerAction, ServerConfig, ServerDriver, ServerEvent,
};

const CLIENTS: usize = 3;

#[derive(Debug, Clone, Arbitrary)]
struct ChaosScenario {
    /// Seed for ChaoticStorage RNG (deterministic failures)
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    operations: Vec<ChaosOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum ChaosOperation {
    ClientSend { client: u8, plaintext: Vec<u8> },
    ServerSend { client: u8, plaintext: Vec<u8> },
    Tick,
}

fn frame_for(actions: &[ServerAction], to: &PeerId) -> Option<Vec<u8>> {
    actions.iter().find_map(|action| match action {
        ServerAction::SendFrame { peer, bytes } if peer == to => Some(bytes.clone()),
        _ => None,
    })
}

fuzz_target!(|scenario: ChaosScenario| {
    let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, scenario.chaos_seed);
    let driver =
        ServerDriver::new(SimEnv::with_seed(1), storage.clone(), ServerConfig::default()).unwrap();
    let server_id = PeerId::from("server");

    // Handshakes happen while storage is healthy
    let clients: Vec<(PeerId, SimClient)> = (0..CLIENTS)
        .map(|i| {
            let id = PeerId::new(format!("client-{i}"));
            let client = SimClient::new(SimEnv::with_seed(100 + i as u64)).unwrap();
            let actions = driver
                .process_event(ServerEvent::FrameReceived {
                    peer: id.clone(),
                    bytes: client.connect(&server_id).unwrap(),
                })
                .unwrap();
            client.receive(&server_id, &frame_for(&actions, &id).unwrap()).unwrap();
            (id, client)
        })
        .collect();

    storage.set_failure_rate(f64::from(scenario.failure_rate_tenth % 10) / 10.0);

    for operation in scenario.operations.into_iter().take(100) {
        match operation {
            ChaosOperation::ClientSend { client, plaintext } => {
                let (id, client) = &clients[client as usize % CLIENTS];
                let actions = driver
                    .process_event(ServerEvent::FrameReceived {
                        peer: id.clone(),
                        bytes: client.send(&server_id, &plaintext).unwrap(),
                    })
                    .unwrap();

                match actions.as_slice() {
                    [ServerAction::Deliver { plaintext: delivered, .. }] => {
                        assert_eq!(delivered, &plaintext);
                    },
                    _ => {
                        let frame = frame_for(&actions, id).unwrap();
                        let Ok(Frame::Error { kind, .. }) = Frame::decode(&frame) else {
                            panic!("expected error frame");
                        };
                        assert_eq!(kind, ErrorKind::Persistence);
                    },
                }
            },
            ChaosOperation::ServerSend { client, plaintext } => {
                let (id, client) = &clients[client as usize % CLIENTS];
                let event = ServerEvent::Send { peer: id.clone(), plaintext: plaintext.clone() };
                // A failed commit discards the envelope, the chain still advances
                if let Ok(actions) = driver.process_event(event) {
                    let frame = frame_for(&actions, id).unwrap();
                    let received = client.receive(&server_id, &frame).unwrap();
                    assert_eq!(received, Received::Message(plaintext));
                }
            },
            ChaosOperation::Tick => {
                let _ = driver.process_event(ServerEvent::Tick);
            },
        }
    }

    storage.set_failure_rate(0.0);
    assert!(driver.run_maintenance().is_clean());
    drop(driver);

    let restarted =
        ServerDriver::new(SimEnv::with_seed(2), storage, ServerConfig::default()).unwrap();
    for (id, client) in &clients {
        let actions = restarted
            .process_event(ServerEvent::FrameReceived {
                peer: id.clone(),
                bytes: client.send(&server_id, b"after heal").unwrap(),
            })
            .unwrap();
        assert_eq!(actions, vec![ServerAction::Deliver {
            peer: id.clone(),
            plaintext: b"after heal".to_vec()
        }]);
    }
});
