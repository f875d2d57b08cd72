//! Pairwise secure channel engine
//!
//! Ties the identity key, the handshake, the Double Ratchet and the session
//! store together. All methods are synchronous and safe to call from many
//! threads; operations on distinct peers never contend on the same lock.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use quorum_crypto::PublicKey;
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    env::Environment,
    error::{Error, Result},
    handshake::{self, HandshakeResponse, PendingHandshake},
    identity::IdentityKeyStore,
    ids::PeerId,
    message::EncryptedEnvelope,
    ratchet::DoubleRatchet,
    session::RatchetSession,
    store::{SessionStore, lock_session},
    storage::Storage,
};

/// Handshake, encryption and decryption for pairwise sessions.
pub struct SecureChannelEngine<E: Environment, S: Storage> {
    env: E,
    identity: IdentityKeyStore,
    sessions: SessionStore<S>,
    ratchet: DoubleRatchet,
    pending: Mutex<HashMap<PeerId, PendingHandshake>>,
    config: EngineConfig,
}

impl<E: Environment, S: Storage> SecureChannelEngine<E, S> {
    /// Create an engine, loading (or creating) the identity key and restoring
    /// persisted sessions.
    pub fn new(env: E, storage: S, config: EngineConfig) -> Result<Self> {
        let identity = IdentityKeyStore::load_or_create(&env, &storage)?;
        let sessions = SessionStore::new(storage);
        let restored = sessions.restore()?;

        info!(restored, "Secure channel engine ready");

        Ok(Self {
            env,
            identity,
            sessions,
            ratchet: DoubleRatchet::new(config.clone()),
            pending: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Local identity public key.
    pub fn identity_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Engine limits.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Responder side of the handshake.
    ///
    /// Creates (or replaces) the session with `peer` and returns the local
    /// identity and ephemeral keys for the `complete` frame. The session is
    /// durably persisted before this returns.
    ///
    /// # Errors
    ///
    /// - `HandshakeFailed`: a key is not 32 bytes or is a low-order point
    /// - `Persistence`: the session could not be stored (nothing installed)
    pub fn initiate_session(
        &self,
        peer: &PeerId,
        peer_identity_key: &[u8],
        peer_ephemeral_key: &[u8],
    ) -> Result<HandshakeResponse> {
        let peer_identity = handshake::parse_key(peer_identity_key, "identity key")?;
        let peer_ephemeral = handshake::parse_key(peer_ephemeral_key, "ephemeral key")?;

        let (session, response) = handshake::respond(
            &self.env,
            self.identity.key_pair(),
            &peer_identity,
            &peer_ephemeral,
        )?;
        self.sessions.insert(peer, session)?;

        info!(%peer, "Session established (responder)");
        Ok(response)
    }

    /// Initiator side, step one: returns the ephemeral key to send along with
    /// [`Self::identity_key`]. A previous pending handshake is replaced.
    pub fn begin_handshake(&self, peer: &PeerId) -> PublicKey {
        let pending = handshake::begin(&self.env);
        let ephemeral = pending.ephemeral_key();
        self.lock_pending().insert(peer.clone(), pending);

        debug!(%peer, "Handshake initiated");
        ephemeral
    }

    /// Initiator side, step two: complete with the responder's keys.
    ///
    /// # Errors
    ///
    /// - `HandshakeFailed`: no pending handshake, or malformed keys. The
    ///   pending handshake is kept on key errors so a corrected `complete` can
    ///   still succeed.
    /// - `Persistence`: the session could not be stored
    pub fn complete_handshake(
        &self,
        peer: &PeerId,
        peer_identity_key: &[u8],
        peer_ephemeral_key: &[u8],
    ) -> Result<()> {
        let peer_identity = handshake::parse_key(peer_identity_key, "identity key")?;
        let peer_ephemeral = handshake::parse_key(peer_ephemeral_key, "ephemeral key")?;

        let Some(pending) = self.lock_pending().get(peer).cloned() else {
            return Err(Error::handshake(format!("no pending handshake with {peer}")));
        };

        let session = handshake::complete(
            pending,
            self.identity.key_pair(),
            &peer_identity,
            &peer_ephemeral,
        )?;
        self.sessions.insert(peer, session)?;
        self.lock_pending().remove(peer);

        info!(%peer, "Session established (initiator)");
        Ok(())
    }

    /// Encrypt a message for `peer`.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`: no session with this peer
    /// - `SessionNotReady`: responder that has not received a message yet
    /// - `Persistence`: encrypted, but the advanced session was not stored;
    ///   the envelope is discarded and the next message uses the next key
    pub fn encrypt(&self, peer: &PeerId, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        self.sessions.with_session(peer, |session| {
            let mut working = session.clone();
            let envelope = self.ratchet.encrypt(&self.env, peer, &mut working, plaintext)?;
            *session = working;
            self.sessions.commit(peer, session)?;

            Ok(envelope)
        })
    }

    /// Decrypt a message from `peer`.
    ///
    /// Runs on a working copy of the session; on any error the stored session
    /// is unchanged.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`: no session with this peer
    /// - `KeyNotFound`: replayed message or message on a retired chain
    /// - `TooManySkipped`: message number too far ahead
    /// - `AuthenticationFailed`: tampered message or wrong session
    /// - `Persistence`: decrypted, but the advanced session was not stored;
    ///   the consumed key is not reusable
    pub fn decrypt(&self, peer: &PeerId, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        self.sessions.with_session(peer, |session| {
            let mut working = session.clone();
            let plaintext = match self.ratchet.decrypt(&self.env, peer, &mut working, envelope) {
                Ok(plaintext) => plaintext,
                Err(error) => {
                    warn!(%peer, %error, "Rejected message");
                    return Err(error);
                },
            };
            *session = working;
            self.sessions.commit(peer, session)?;

            Ok(plaintext)
        })
    }

    /// Tear down the session with `peer` (memory and storage).
    ///
    /// Returns true if a session existed.
    pub fn end_session(&self, peer: &PeerId) -> Result<bool> {
        self.lock_pending().remove(peer);
        let existed = self.sessions.remove(peer)?;
        if existed {
            info!(%peer, "Session ended");
        }
        Ok(existed)
    }

    /// Whether a session with `peer` exists.
    pub fn has_session(&self, peer: &PeerId) -> Result<bool> {
        self.sessions.contains(peer)
    }

    /// Copy of the current session state (diagnostics and tests).
    pub fn session_snapshot(&self, peer: &PeerId) -> Result<Option<RatchetSession>> {
        Ok(self.sessions.get(peer)?.map(|handle| lock_session(&handle).clone()))
    }

    /// Peers with a loaded session.
    pub fn peers(&self) -> Vec<PeerId> {
        self.sessions.peers()
    }

    /// Drop skipped keys older than the configured retention.
    ///
    /// Returns the number of removed keys.
    pub fn collect_garbage(&self) -> usize {
        let retention = self.config.skipped_key_retention.as_secs();
        let cutoff = self.env.wall_clock_secs().saturating_sub(retention);
        let removed = self.sessions.purge_skipped_keys(cutoff);
        if removed > 0 {
            info!(removed, "Collected expired skipped keys");
        }
        removed
    }

    /// Rewrite sessions whose last commit failed.
    pub fn flush(&self) -> Result<usize> {
        self.sessions.flush()
    }

    /// Number of sessions waiting for a successful write.
    pub fn dirty_sessions(&self) -> usize {
        self.sessions.dirty_count()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<PeerId, PendingHandshake>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
