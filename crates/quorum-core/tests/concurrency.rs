//! Concurrent access to one engine and one group manager.
//!
//! Distinct peers and groups share nothing but the maps; every thread must
//! see exactly the state its own operations produced.

use std::thread;

use quorum_core::{
    EngineConfig, Frame, GroupId, GroupSessionManager, MemberId, MemoryStorage, PeerId,
    SecureChannelEngine,
};
use quorum_harness::{Received, SimClient, SimEnv};

const CLIENTS: u64 = 8;
const MESSAGES: u8 = 40;

fn accept(server: &SecureChannelEngine<SimEnv, MemoryStorage>, peer: &PeerId, frame: &[u8]) -> Vec<u8> {
    let Ok(Frame::HandshakeInitiate { identity_key, ephemeral_key }) = Frame::decode(frame) else {
        unreachable!("expected initiate frame");
    };
    let response = server.initiate_session(peer, &identity_key, &ephemeral_key).unwrap();
    Frame::HandshakeComplete {
        identity_key: response.identity_key.as_bytes().to_vec(),
        ephemeral_key: response.ephemeral_key.as_bytes().to_vec(),
    }
    .encode()
    .unwrap()
}

#[test]
fn parallel_sessions_do_not_interfere() {
    let server =
        SecureChannelEngine::new(SimEnv::with_seed(1), MemoryStorage::new(), EngineConfig::default())
            .unwrap();
    let server_id = PeerId::from("server");

    thread::scope(|scope| {
        for i in 0..CLIENTS {
            let (server, server_id) = (&server, &server_id);
            scope.spawn(move || {
                let client = SimClient::new(SimEnv::with_seed(100 + i)).unwrap();
                let peer = PeerId::new(format!("client-{i}"));

                let complete = accept(server, &peer, &client.connect(server_id).unwrap());
                assert_eq!(client.receive(server_id, &complete).unwrap(), Received::Connected);

                for n in 0..MESSAGES {
                    let Ok(Frame::Encrypted(envelope)) =
                        Frame::decode(&client.send(server_id, &[n, i as u8]).unwrap())
                    else {
                        unreachable!("expected encrypted frame");
                    };
                    assert_eq!(server.decrypt(&peer, &envelope).unwrap(), vec![n, i as u8]);
                }

                let reply = Frame::Encrypted(server.encrypt(&peer, b"done").unwrap()).encode().unwrap();
                assert_eq!(client.receive(server_id, &reply).unwrap(), Received::Message(b"done".to_vec()));
            });
        }
    });

    assert_eq!(server.peers().len(), CLIENTS as usize);
    for i in 0..CLIENTS {
        let session = server.session_snapshot(&PeerId::new(format!("client-{i}"))).unwrap().unwrap();
        assert_eq!(session.recv_message_number(), u32::from(MESSAGES));
        assert_eq!(session.send_message_number(), 1);
        assert!(session.skipped_keys().is_empty());
    }
}

#[test]
fn concurrent_membership_changes_each_advance_the_epoch() {
    let manager = GroupSessionManager::new(SimEnv::with_seed(2), MemoryStorage::new());
    let group = GroupId::from("parallel");
    let owner = MemberId::from("owner");
    manager.create_group_session(&group, &owner, Vec::new()).unwrap();

    let epochs: Vec<u64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let (manager, group, owner) = (&manager, &group, &owner);
                scope.spawn(move || {
                    manager.add_group_member(group, &MemberId::new(format!("m{i}")), owner).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let mut sorted = epochs;
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=16).collect::<Vec<u64>>());
    assert_eq!(manager.epoch(&group).unwrap(), 16);
    assert_eq!(manager.group_snapshot(&group).unwrap().member_count(), 17);
}

#[test]
fn groups_progress_independently() {
    let manager = GroupSessionManager::new(SimEnv::with_seed(3), MemoryStorage::new());
    let owner = MemberId::from("owner");

    thread::scope(|scope| {
        for g in 0..4u64 {
            let (manager, owner) = (&manager, &owner);
            scope.spawn(move || {
                let group = GroupId::new(format!("group-{g}"));
                manager.create_group_session(&group, owner, Vec::new()).unwrap();
                for i in 0..=g {
                    manager.add_group_member(&group, &MemberId::new(format!("m{i}")), owner).unwrap();
                }
                let envelope = manager.encrypt_group_message(&group, owner, b"hi").unwrap();
                assert_eq!(manager.decrypt_group_message(&group, owner, &envelope).unwrap(), b"hi");
            });
        }
    });

    for g in 0..4u64 {
        assert_eq!(manager.epoch(&GroupId::new(format!("group-{g}"))).unwrap(), g + 1);
    }
}
