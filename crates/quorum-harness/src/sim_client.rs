//! Simulated client: the initiating side of a secure channel.
//!
//! Speaks the JSON wire protocol so tests exercise the same frames a real
//! client would send. Backed by its own [`MemoryStorage`], which survives
//! [`SimClient::restart`].

use quorum_core::{
    EngineConfig, Error, ErrorKind, Frame, MemoryStorage, PeerId, Result, SecureChannelEngine,
};
use tracing::debug;

use crate::SimEnv;

/// What a client observed when it processed an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The handshake completed; the channel is ready to send
    Connected,
    /// A decrypted application message
    Message(Vec<u8>),
    /// The peer rejected one of our frames
    Rejected {
        /// Classification reported by the peer
        kind: ErrorKind,
        /// Peer's description
        message: String,
    },
}

/// Client endpoint driving a [`SecureChannelEngine`] through wire frames.
pub struct SimClient {
    env: SimEnv,
    storage: MemoryStorage,
    config: EngineConfig,
    engine: SecureChannelEngine<SimEnv, MemoryStorage>,
}

impl SimClient {
    /// Create a client with a fresh identity.
    pub fn new(env: SimEnv) -> Result<Self> {
        Self::with_config(env, EngineConfig::default())
    }

    /// Create a client with a custom engine configuration.
    pub fn with_config(env: SimEnv, config: EngineConfig) -> Result<Self> {
        let storage = MemoryStorage::new();
        let engine = SecureChannelEngine::new(env.clone(), storage.clone(), config.clone())?;
        Ok(Self { env, storage, config, engine })
    }

    /// Initiate frame for `server`.
    ///
    /// Starting a new handshake discards any pending one for the same peer.
    pub fn connect(&self, server: &PeerId) -> Result<Vec<u8>> {
        let ephemeral_key = self.engine.begin_handshake(server);
        Frame::HandshakeInitiate {
            identity_key: self.engine.identity_key().as_bytes().to_vec(),
            ephemeral_key: ephemeral_key.as_bytes().to_vec(),
        }
        .encode()
    }

    /// Encrypted frame carrying `plaintext` to `peer`.
    pub fn send(&self, peer: &PeerId, plaintext: &[u8]) -> Result<Vec<u8>> {
        Frame::Encrypted(self.engine.encrypt(peer, plaintext)?).encode()
    }

    /// Process a frame received from `peer`.
    pub fn receive(&self, peer: &PeerId, bytes: &[u8]) -> Result<Received> {
        match Frame::decode(bytes)? {
            Frame::HandshakeComplete { identity_key, ephemeral_key } => {
                self.engine.complete_handshake(peer, &identity_key, &ephemeral_key)?;
                debug!(%peer, "Client connected");
                Ok(Received::Connected)
            },
            Frame::Encrypted(envelope) => Ok(Received::Message(self.engine.decrypt(peer, &envelope)?)),
            Frame::Error { kind, message } => Ok(Received::Rejected { kind, message }),
            Frame::HandshakeInitiate { .. } => {
                Err(Error::HandshakeFailed { reason: "initiate frame sent to a client".into() })
            },
        }
    }

    /// Simulate a process restart: rebuild the engine from persisted state.
    pub fn restart(&mut self) -> Result<()> {
        self.engine =
            SecureChannelEngine::new(self.env.clone(), self.storage.clone(), self.config.clone())?;
        Ok(())
    }

    /// Underlying engine.
    pub fn engine(&self) -> &SecureChannelEngine<SimEnv, MemoryStorage> {
        &self.engine
    }

    /// Client's persisted state.
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }
}
