//! Fuzz target for the ratchet pipeline (encode → decode → decrypt)
//!
//! # Strategy
//!
//! - Both directions: client and server send in any interleaving
//! - Delivery: frames delivered late, twice, or never
//! - Attacks: flipped ciphertext bits, rewritten message numbers, raw bytes
//!
//! # Invariants
//!
//! - A frame decrypts at most once, and only to what was sent
//! - Rejected frames leave the receiving session unchanged
//! - Skipped keys never exceed the configured bound
//! - Nothing panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quorum_core::{
    EncryptedEnvelope, EngineConfig, Frame, MemoryStorage, PeerId, SecureChannelEngine,
    storage::encode,
};
use quorum_harness::{Received, SimClient, SimEnv};

type Engine = SecureChannelEngine<SimEnv, MemoryStorage>;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    client_seed: u64,
    server_seed: u64,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    ClientSend(Vec<u8>),
    ServerSend(Vec<u8>),
    DeliverToServer { index: u8 },
    DeliverToClient { index: u8 },
    TamperToServer { index: u8, bit: u16 },
    ShiftNumber { index: u8, delta: u16 },
    RawToServer(Vec<u8>),
}

struct Sent {
    frame: Vec<u8>,
    plaintext: Vec<u8>,
    delivered: bool,
}

fn nth(sent: &mut [Sent], index: u8) -> Option<&mut Sent> {
    let len = sent.len();
    if len == 0 {
        return None;
    }
    sent.get_mut(index as usize % len)
}

fn envelope(frame: &[u8]) -> EncryptedEnvelope {
    match Frame::decode(frame) {
        Ok(Frame::Encrypted(envelope)) => envelope,
        other => panic!("own frame must decode as encrypted, got {other:?}"),
    }
}

fn state(server: &Engine, peer: &PeerId) -> Vec<u8> {
    let session = server.session_snapshot(peer).unwrap().unwrap();
    encode(&session).unwrap()
}

/// Decrypt on the server; a rejection must not change the stored session.
fn open(server: &Engine, peer: &PeerId, envelope: &EncryptedEnvelope) -> Option<Vec<u8>> {
    let before = state(server, peer);
    match server.decrypt(peer, envelope) {
        Ok(plaintext) => Some(plaintext),
        Err(_) => {
            assert_eq!(state(server, peer), before, "rejected frame changed the session");
            None
        },
    }
}

fuzz_target!(|scenario: Scenario| {
    let config = EngineConfig { max_skip: 64, max_skipped_keys: 128, ..EngineConfig::default() };
    let client =
        SimClient::with_config(SimEnv::with_seed(scenario.client_seed), config.clone()).unwrap();
    let server =
        Engine::new(SimEnv::with_seed(scenario.server_seed), MemoryStorage::new(), config.clone())
            .unwrap();
    let (server_id, client_id) = (PeerId::from("server"), PeerId::from("client"));

    let Ok(Frame::HandshakeInitiate { identity_key, ephemeral_key }) =
        Frame::decode(&client.connect(&server_id).unwrap())
    else {
        panic!("client must produce an initiate frame");
    };
    let response = server.initiate_session(&client_id, &identity_key, &ephemeral_key).unwrap();
    let complete = Frame::HandshakeComplete {
        identity_key: response.identity_key.as_bytes().to_vec(),
        ephemeral_key: response.ephemeral_key.as_bytes().to_vec(),
    }
    .encode()
    .unwrap();
    assert_eq!(client.receive(&server_id, &complete).unwrap(), Received::Connected);

    let mut to_server: Vec<Sent> = Vec::new();
    let mut to_client: Vec<Sent> = Vec::new();

    for operation in scenario.operations.into_iter().take(200) {
        match operation {
            Operation::ClientSend(plaintext) => {
                let frame = client.send(&server_id, &plaintext).unwrap();
                to_server.push(Sent { frame, plaintext, delivered: false });
            },
            Operation::ServerSend(plaintext) => {
                // Fails until the client has spoken first
                if let Ok(envelope) = server.encrypt(&client_id, &plaintext) {
                    let frame = Frame::Encrypted(envelope).encode().unwrap();
                    to_client.push(Sent { frame, plaintext, delivered: false });
                }
            },
            Operation::DeliverToServer { index } => {
                let Some(sent) = nth(&mut to_server, index) else { continue };
                // Undelivered frames may still fail: beyond the skip window or evicted
                if let Some(plaintext) = open(&server, &client_id, &envelope(&sent.frame)) {
                    assert!(!sent.delivered, "frame decrypted twice");
                    assert_eq!(plaintext, sent.plaintext);
                    sent.delivered = true;
                }
            },
            Operation::DeliverToClient { index } => {
                let Some(sent) = nth(&mut to_client, index) else { continue };
                if let Ok(Received::Message(plaintext)) = client.receive(&server_id, &sent.frame) {
                    assert!(!sent.delivered, "frame decrypted twice");
                    assert_eq!(plaintext, sent.plaintext);
                    sent.delivered = true;
                }
            },
            Operation::TamperToServer { index, bit } => {
                let Some(sent) = nth(&mut to_server, index) else { continue };
                let mut envelope = envelope(&sent.frame);
                if envelope.ciphertext.is_empty() {
                    continue;
                }
                let bit = bit as usize % (envelope.ciphertext.len() * 8);
                envelope.ciphertext[bit / 8] ^= 1 << (bit % 8);

                assert!(open(&server, &client_id, &envelope).is_none(), "tampered frame accepted");
            },
            Operation::ShiftNumber { index, delta } => {
                let Some(sent) = nth(&mut to_server, index) else { continue };
                let mut envelope = envelope(&sent.frame);
                if delta == 0 {
                    continue;
                }
                envelope.header.message_number =
                    envelope.header.message_number.wrapping_add(u32::from(delta));

                // The header is authenticated: a rewritten number never opens
                assert!(open(&server, &client_id, &envelope).is_none(), "shifted frame accepted");
            },
            Operation::RawToServer(bytes) => {
                if let Ok(Frame::Encrypted(envelope)) = Frame::decode(&bytes) {
                    let _ = open(&server, &client_id, &envelope);
                }
            },
        }

        let session = server.session_snapshot(&client_id).unwrap().unwrap();
        assert!(session.skipped_keys().len() <= config.max_skipped_keys);
    }
});
