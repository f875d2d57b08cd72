//! Quorum secure-messaging core.
//!
//! Protocol logic for pairwise and group encrypted channels: a triple
//! Diffie-Hellman handshake, the Double Ratchet, and epoch-keyed group
//! sessions. The crate performs no I/O of its own. Time and randomness come
//! from an [`Environment`], persistence goes through a synchronous
//! [`Storage`], and the transport is left to the caller.
//!
//! # Architecture
//!
//! ```text
//!   wire frame ──► SecureChannelEngine ──► handshake ──► SessionStore
//!                        │                                   │
//!                        └──────► DoubleRatchet ◄────────────┘
//!                                      │
//!                                      ▼
//!                              seal / open (AEAD)
//!
//!   group frame ──► GroupSessionManager ──► seal / open (AEAD)
//! ```
//!
//! # Components
//!
//! - [`SecureChannelEngine`]: pairwise sessions (handshake, encrypt, decrypt,
//!   skipped-key GC)
//! - [`GroupSessionManager`]: group membership, epochs and group messages
//! - [`Frame`]: JSON wire frames
//! - [`SessionStore`]: per-peer session state with an explicit commit
//!   boundary
//!
//! # Determinism
//!
//! Given the same [`Environment`] seed and the same sequence of calls, every
//! operation produces the same bytes. Simulation tests rely on this.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod group;
pub mod handshake;
pub mod identity;
pub mod ids;
pub mod message;
pub mod ratchet;
pub mod session;
pub mod storage;
pub mod store;
pub mod wire;

pub use config::EngineConfig;
pub use engine::SecureChannelEngine;
pub use env::Environment;
pub use error::{Error, ErrorKind, Result};
pub use group::{GroupSession, GroupSessionManager};
pub use handshake::{HandshakeResponse, PendingHandshake};
pub use identity::IdentityKeyStore;
pub use ids::{GroupId, MemberId, PeerId};
pub use message::{EncryptedEnvelope, GroupEnvelope, MessageHeader};
pub use ratchet::DoubleRatchet;
pub use session::{RatchetSession, SkippedKeyId, SkippedKeys};
pub use storage::{MemoryStorage, Storage, StorageError};
pub use store::SessionStore;
pub use wire::Frame;
