//! Fuzz target for GroupSessionManager
//!
//! Random membership changes, broadcasts and deliveries by arbitrary members.
//!
//! # Invariants
//!
//! - The epoch equals the number of successful membership changes
//! - Only current members encrypt or decrypt
//! - Envelopes from an earlier epoch are always rejected
//! - Only current members change membership
//! - Nothing panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quorum_core::{Error, GroupEnvelope, GroupId, GroupSessionManager, MemberId, MemoryStorage};
use quorum_harness::SimEnv;

const MEMBERS: [&str; 6] = ["owner", "alice", "bob", "carol", "dave", "eve"];

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    initial: u8,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    Add { member: u8, requester: u8 },
    Remove { member: u8, requester: u8 },
    Encrypt { sender: u8, plaintext: Vec<u8> },
    Decrypt { envelope: u8, receiver: u8 },
    Decode(Vec<u8>),
}

fn member(index: u8) -> MemberId {
    MemberId::from(MEMBERS[index as usize % MEMBERS.len()])
}

fuzz_target!(|scenario: Scenario| {
    let manager = GroupSessionManager::new(SimEnv::with_seed(scenario.seed), MemoryStorage::new());
    let group = GroupId::from("fuzz");
    let owner = member(0);
    let initial: Vec<MemberId> =
        (1..MEMBERS.len() as u8).filter(|i| scenario.initial & (1 << i) != 0).map(member).collect();
    manager.create_group_session(&group, &owner, initial).unwrap();

    let mut changes = 0u64;
    let mut sent: Vec<(GroupEnvelope, Vec<u8>)> = Vec::new();

    for operation in scenario.operations.into_iter().take(200) {
        match operation {
            Operation::Add { member: index, requester } => {
                let snapshot = manager.group_snapshot(&group).unwrap();
                match manager.add_group_member(&group, &member(index), &member(requester)) {
                    Ok(epoch) => {
                        changes += 1;
                        assert_eq!(epoch, changes);
                    },
                    Err(Error::Unauthorized { .. }) => {
                        assert!(!snapshot.is_member(&member(requester)));
                    },
                    Err(Error::AlreadyMember { .. }) => assert!(snapshot.is_member(&member(index))),
                    Err(error) => panic!("unexpected add error: {error}"),
                }
            },
            Operation::Remove { member: index, requester } => {
                let snapshot = manager.group_snapshot(&group).unwrap();
                match manager.remove_group_member(&group, &member(index), &member(requester)) {
                    Ok(epoch) => {
                        assert!(snapshot.is_member(&member(requester)));
                        changes += 1;
                        assert_eq!(epoch, changes);
                    },
                    Err(Error::Unauthorized { .. }) => {
                        assert!(!snapshot.is_member(&member(requester)));
                    },
                    Err(Error::NotAMember { .. }) => assert!(!snapshot.is_member(&member(index))),
                    Err(error) => panic!("unexpected remove error: {error}"),
                }
            },
            Operation::Encrypt { sender, plaintext } => {
                let snapshot = manager.group_snapshot(&group).unwrap();
                match manager.encrypt_group_message(&group, &member(sender), &plaintext) {
                    Ok(envelope) => {
                        assert!(snapshot.is_member(&member(sender)));
                        sent.push((envelope, plaintext));
                    },
                    Err(_) => assert!(!snapshot.is_member(&member(sender))),
                }
            },
            Operation::Decrypt { envelope, receiver } => {
                if sent.is_empty() {
                    continue;
                }
                let (envelope, plaintext) = &sent[envelope as usize % sent.len()];
                let current = manager.epoch(&group).unwrap();
                let is_member = manager.group_snapshot(&group).unwrap().is_member(&member(receiver));

                match manager.decrypt_group_message(&group, &member(receiver), envelope) {
                    Ok(opened) => {
                        assert!(is_member);
                        assert_eq!(envelope.epoch, current);
                        assert_eq!(&opened, plaintext);
                    },
                    Err(_) => assert!(!is_member || envelope.epoch != current),
                }
            },
            Operation::Decode(bytes) => {
                if let Ok(envelope) = GroupEnvelope::decode(&bytes) {
                    let _ = manager.decrypt_group_message(&group, &envelope.sender_id, &envelope);
                }
            },
        }

        assert_eq!(manager.epoch(&group).unwrap(), changes);
    }
});
