//! Encrypted message envelopes
//!
//! Envelopes are wire-only: they are produced by `encrypt`, consumed by
//! `decrypt`, and never persisted. JSON framing lives in [`crate::wire`].

use quorum_crypto::{NONCE_SIZE, PublicKey, TAG_SIZE};

use crate::ids::{GroupId, MemberId};

/// Ratchet metadata sent in the clear with every pairwise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKey,
    /// Number of messages the sender sent on its previous sending chain
    pub previous_chain_length: u32,
    /// Index of this message in the current sending chain
    pub message_number: u32,
}

impl MessageHeader {
    /// Encoded header size: ratchet key (32) + two big-endian u32 counters
    pub const ENCODED_SIZE: usize = 32 + 4 + 4;

    /// Canonical encoding, bound as AEAD associated data.
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[..32].copy_from_slice(self.ratchet_key.as_bytes());
        out[32..36].copy_from_slice(&self.previous_chain_length.to_be_bytes());
        out[36..].copy_from_slice(&self.message_number.to_be_bytes());
        out
    }
}

/// Pairwise encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Ratchet metadata (authenticated, not encrypted)
    pub header: MessageHeader,
    /// Random 96-bit nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Encrypted payload
    pub ciphertext: Vec<u8>,
    /// Detached Poly1305 tag
    pub auth_tag: [u8; TAG_SIZE],
}

/// Group channel message, tagged with the epoch it was encrypted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEnvelope {
    /// Group the message belongs to
    pub group_id: GroupId,
    /// Member that encrypted the message
    pub sender_id: MemberId,
    /// Group epoch at encryption time
    pub epoch: u64,
    /// Encrypted payload
    pub ciphertext: Vec<u8>,
    /// Random 96-bit nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Detached Poly1305 tag
    pub auth_tag: [u8; TAG_SIZE],
}

/// Associated data for a group message: length-prefixed group and sender ids
/// followed by the big-endian epoch.
pub(crate) fn group_aad(group_id: &GroupId, sender_id: &MemberId, epoch: u64) -> Vec<u8> {
    let group = group_id.as_str().as_bytes();
    let sender = sender_id.as_str().as_bytes();

    let mut aad = Vec::with_capacity(4 + group.len() + 4 + sender.len() + 8);
    aad.extend_from_slice(&(group.len() as u32).to_be_bytes());
    aad.extend_from_slice(group);
    aad.extend_from_slice(&(sender.len() as u32).to_be_bytes());
    aad.extend_from_slice(sender);
    aad.extend_from_slice(&epoch.to_be_bytes());
    aad
}
