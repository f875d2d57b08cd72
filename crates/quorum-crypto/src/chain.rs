//! Symmetric-key ratchet step
//!
//! # Security Properties
//!
//! - Forward Secrecy: a chain key only moves forward through HMAC, the old
//!   value is zeroized when the chain advances
//! - Key Uniqueness: each step produces a distinct message key
//! - Determinism: the same chain key always produces the same sequence

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    kdf::expand_32,
    keys::{KEY_SIZE, Key32},
};

type HmacSha256 = Hmac<Sha256>;

/// Input byte for deriving the next chain key
const CHAIN_CONSTANT: &[u8] = &[0x02];

/// Info label for deriving a message key
const MESSAGE_INFO: &[u8] = b"message";

/// One-time key for a single message.
///
/// Persisted while it sits in the skipped-key cache, otherwise used once and
/// dropped (zeroized through [`Key32`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey(Key32);

impl MessageKey {
    /// Wrap raw key material.
    pub fn from_key(key: Key32) -> Self {
        Self(key)
    }

    /// 32-byte `ChaCha20-Poly1305` key.
    pub fn key(&self) -> &Key32 {
        &self.0
    }
}

/// Sending or receiving chain key of a Double Ratchet session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainKey(Key32);

impl ChainKey {
    /// Start a chain from the key produced by a DH ratchet step.
    pub fn new(key: Key32) -> Self {
        Self(key)
    }

    /// Message key for the current position, without advancing.
    pub fn message_key(&self) -> MessageKey {
        MessageKey(expand_32(None, self.0.as_bytes(), MESSAGE_INFO))
    }

    /// Next chain key, `HMAC(ck, 0x02)`.
    pub fn next(&self) -> ChainKey {
        let Ok(mut mac) = HmacSha256::new_from_slice(self.0.as_bytes()) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(CHAIN_CONSTANT);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&result);
        ChainKey(Key32::from_bytes(key))
    }

    /// Derive the message key for the current position and advance the chain.
    ///
    /// The previous chain key is dropped (and zeroized) in place.
    pub fn step(&mut self) -> MessageKey {
        let message_key = self.message_key();
        *self = self.next();
        message_key
    }
}
