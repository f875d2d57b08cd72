//! Fixed-size key material and X25519 key pairs
//!
//! Every key that crosses an API boundary is a 32-byte newtype. Byte slices
//! of any other length are rejected when the newtype is constructed, so the
//! ratchet never sees malformed key material.

use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of every key handled by this crate (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Secret 32-byte symmetric key (root, chain, message or group key).
///
/// Zeroized on drop, compared in constant time and redacted in debug output.
#[derive(Clone, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Key32(#[serde(with = "serde_bytes")] [u8; KEY_SIZE]);

impl Key32 {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse key bytes from a slice, rejecting any length other than 32.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for Key32 {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl fmt::Debug for Key32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key32").field("value", &"***").finish()
    }
}

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; KEY_SIZE]);

impl PublicKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a public key from a slice, rejecting any length other than 32.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// X25519 key pair used for identity, handshake ephemeral and ratchet keys.
///
/// The secret half is never exposed except through [`KeyPair::to_secret`],
/// which exists for persistence. Serializes as its secret key only; the public
/// key is recomputed on load.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "Key32", into = "Key32")]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from 32 bytes of secret material.
    ///
    /// Caller MUST provide cryptographically secure random bytes in
    /// production. Clamping happens inside X25519 scalar multiplication.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Public half of this key pair.
    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Secret half as a zeroizing key (for persistence only).
    pub fn to_secret(&self) -> Key32 {
        Key32(self.secret.to_bytes())
    }

    /// X25519 Diffie-Hellman with the other party's public key.
    ///
    /// # Errors
    ///
    /// - `NonContributory`: the peer key is a low-order point and the shared
    ///   secret is all zeros
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> Result<Key32, CryptoError> {
        let shared = self.secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public.0));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(Key32(shared.to_bytes()))
    }
}

impl From<Key32> for KeyPair {
    fn from(secret: Key32) -> Self {
        Self::from_secret_bytes(*secret.as_bytes())
    }
}

impl From<KeyPair> for Key32 {
    fn from(pair: KeyPair) -> Self {
        pair.to_secret()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).field("secret", &"***").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_slice_rejects_wrong_length() {
        let result = Key32::from_slice(&[0u8; 31]);
        assert_eq!(result, Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 }));

        let result = PublicKey::from_slice(&[0u8; 33]);
        assert_eq!(result, Err(CryptoError::InvalidKeyLength { expected: 32, actual: 33 }));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = Key32::from_bytes([0xAB; 32]);
        let debug = format!("{key:?}");
        assert!(!debug.contains("171"), "raw bytes must not appear in debug output");
        assert!(debug.contains("***"));
    }

    #[test]
    fn diffie_hellman_agrees() {
        let alice = KeyPair::from_secret_bytes([1; 32]);
        let bob = KeyPair::from_secret_bytes([2; 32]);

        let ab = alice.diffie_hellman(&bob.public()).unwrap();
        let ba = bob.diffie_hellman(&alice.public()).unwrap();

        assert_eq!(ab, ba);
    }

    #[test]
    fn diffie_hellman_rejects_low_order_point() {
        let alice = KeyPair::from_secret_bytes([1; 32]);
        let zero = PublicKey::from_bytes([0; 32]);

        assert_eq!(alice.diffie_hellman(&zero), Err(CryptoError::NonContributory));
    }

    #[test]
    fn key_pair_survives_secret_roundtrip() {
        let pair = KeyPair::from_secret_bytes([7; 32]);
        let restored = KeyPair::from(pair.to_secret());

        assert_eq!(pair.public(), restored.public());
    }
}
