//! Quorum Cryptographic Primitives
//!
//! Cryptographic building blocks for the Quorum secure-messaging core. Pure
//! functions with deterministic outputs. Callers provide random bytes (key
//! material, nonces) so that protocol logic stays reproducible in tests.
//!
//! # Key Lifecycle
//!
//! A pairwise session starts from a triple Diffie-Hellman handshake. Its
//! output seeds a root key which is advanced by every DH ratchet step. Each
//! step produces a fresh chain key, from which a symmetric ratchet produces
//! one-time message keys.
//!
//! ```text
//! DH1 ‖ DH2 ‖ DH3
//!        │
//!        ▼ HKDF (zero salt)
//! Root Key ──────────────┐
//!        │               │ DH ratchet step
//!        ▼ HKDF (salt=RK)│
//! Chain Key ◄────────────┘
//!        │
//!        ▼ HMAC(CK, 0x02)      HKDF(CK, "message")
//! Next Chain Key               Message Key
//!                                  │
//!                                  ▼
//!                       ChaCha20-Poly1305 → Ciphertext + Tag
//! ```
//!
//! Group channels use a separate chain: a random seed expands into the epoch 0
//! key, and every membership change mixes fresh randomness into the previous
//! epoch key.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain keys only move forward through HMAC; nothing derives a previous
//!   chain key from the current one
//! - Message keys are zeroized on drop
//!
//! Authenticity:
//! - `ChaCha20-Poly1305` AEAD with the ratchet header bound as associated data
//! - Failed authentication tag -> reject message
//!
//! Post-Compromise Security:
//! - Every DH ratchet step mixes a fresh X25519 shared secret into the root key

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod chain;
pub mod error;
pub mod kdf;
pub mod keys;

pub use aead::{NONCE_SIZE, Sealed, TAG_SIZE, open, seal};
pub use chain::{ChainKey, MessageKey};
pub use error::CryptoError;
pub use kdf::{
    HANDSHAKE_INFO, advance_group_key, derive_group_key, derive_handshake_root, kdf_root,
};
pub use keys::{KEY_SIZE, Key32, KeyPair, PublicKey};
