//! Chaos tests: protocol state under failing storage.
//!
//! Writes fail at random. Whatever fails, the in-memory state must stay
//! usable, and once storage heals one maintenance pass must bring the
//! persisted state back in line with memory.

use proptest::prelude::*;
use quorum_core::{ErrorKind, Frame, PeerId, storage::encode};
use quorum_harness::{SimClient, SimEnv};
use quorum_server::{
    ChaoticStorage, MemoryStorage, ServerAction, ServerConfig, ServerDriver, ServerEvent, Storage,
};

type ChaosDriver = ServerDriver<SimEnv, ChaoticStorage<MemoryStorage>>;

fn frame_for(actions: &[ServerAction], to: &PeerId) -> Option<Vec<u8>> {
    actions.iter().find_map(|action| match action {
        ServerAction::SendFrame { peer, bytes } if peer == to => Some(bytes.clone()),
        _ => None,
    })
}

/// Connect a client while storage still works.
fn connected(storage: &ChaoticStorage<MemoryStorage>, seed: u64) -> (ChaosDriver, SimClient) {
    storage.set_failure_rate(0.0);
    let driver =
        ServerDriver::new(SimEnv::with_seed(seed), storage.clone(), ServerConfig::default()).unwrap();
    let client = SimClient::new(SimEnv::with_seed(seed + 1)).unwrap();

    let (server_id, alice) = (PeerId::from("server"), PeerId::from("alice"));
    let actions = driver
        .process_event(ServerEvent::FrameReceived {
            peer: alice.clone(),
            bytes: client.connect(&server_id).unwrap(),
        })
        .unwrap();
    client.receive(&server_id, &frame_for(&actions, &alice).unwrap()).unwrap();

    (driver, client)
}

#[test]
fn persistence_failure_reports_transient_error() {
    let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
    let (driver, client) = connected(&storage, 1);
    let (server_id, alice) = (PeerId::from("server"), PeerId::from("alice"));

    storage.set_failure_rate(1.0);
    let actions = driver
        .process_event(ServerEvent::FrameReceived {
            peer: alice.clone(),
            bytes: client.send(&server_id, b"x").unwrap(),
        })
        .unwrap();

    let Ok(Frame::Error { kind, .. }) = Frame::decode(&frame_for(&actions, &alice).unwrap()) else {
        unreachable!("expected error frame");
    };
    assert_eq!(kind, ErrorKind::Persistence);
    assert!(kind.is_transient());
    assert_eq!(driver.engine().dirty_sessions(), 1);

    storage.set_failure_rate(0.0);
    assert!(driver.run_maintenance().is_clean());
}

#[test]
fn prop_chaos_state_converges_after_heal() {
    proptest!(ProptestConfig::with_cases(24), |(
        failure_rate in 0.0..0.7,
        seed in any::<u64>(),
        message_count in 1usize..20,
    )| {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, seed);
        let (driver, client) = connected(&storage, 7);
        let (server_id, alice) = (PeerId::from("server"), PeerId::from("alice"));

        storage.set_failure_rate(failure_rate);
        let mut delivered = 0usize;
        for i in 0..message_count {
            let actions = driver
                .process_event(ServerEvent::FrameReceived {
                    peer: alice.clone(),
                    bytes: client.send(&server_id, &[i as u8]).unwrap(),
                })
                .unwrap();

            if let [ServerAction::Deliver { plaintext, .. }] = actions.as_slice() {
                prop_assert_eq!(plaintext, &vec![i as u8]);
                delivered += 1;
            } else {
                // The key is consumed in memory even when the write fails
                let frame = frame_for(&actions, &alice).unwrap();
                let Ok(Frame::Error { kind, .. }) = Frame::decode(&frame) else {
                    unreachable!("expected error frame");
                };
                prop_assert_eq!(kind, ErrorKind::Persistence);
            }
        }
        prop_assert_eq!(message_count - delivered, storage.injected_failures());

        storage.set_failure_rate(0.0);
        prop_assert!(driver.run_maintenance().is_clean());

        let in_memory = driver.engine().session_snapshot(&alice).unwrap().unwrap();
        let persisted = storage.inner().load("session/alice").unwrap().unwrap();
        prop_assert_eq!(encode(&in_memory).unwrap(), persisted);
    });
}
