//! Triple Diffie-Hellman key agreement
//!
//! Both parties contribute a long-term identity key and a fresh ephemeral
//! key. The responder (server) answers an `initiate` frame; the initiator
//! (client) completes with the responder's keys.
//!
//! ```text
//! Initiator (I)                               Responder (R)
//!   begin: eph_I            ── id_I, eph_I ──►  respond: eph_R
//!                                               DH(id_R, eph_I) ‖ DH(eph_R, id_I) ‖ DH(eph_R, eph_I)
//!   complete                ◄── id_R, eph_R ──
//!   DH(eph_I, id_R) ‖ DH(id_I, eph_R) ‖ DH(eph_I, eph_R)
//! ```
//!
//! Both concatenations are byte-identical, so both sides derive the same root
//! key. The responder's session has no receiving ratchet key yet: it learns
//! the initiator's ratchet key from the first inbound message, which makes the
//! initiator the first sender.

use quorum_crypto::{KeyPair, PublicKey, derive_handshake_root};

use crate::{
    env::Environment,
    error::{Error, Result},
    session::RatchetSession,
};

/// Local keys returned to the initiator in the `complete` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Responder's long-term identity key
    pub identity_key: PublicKey,
    /// Responder's fresh ephemeral key
    pub ephemeral_key: PublicKey,
}

/// Initiator state between `begin` and `complete`.
///
/// Held in memory only; a restart simply requires a new handshake.
#[derive(Debug, Clone)]
pub struct PendingHandshake {
    ephemeral: KeyPair,
}

impl PendingHandshake {
    /// Ephemeral key to send in the `initiate` frame.
    pub fn ephemeral_key(&self) -> PublicKey {
        self.ephemeral.public()
    }
}

/// Parse a peer key, reporting wrong lengths as `HandshakeFailed`.
pub fn parse_key(bytes: &[u8], field: &str) -> Result<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|e| Error::handshake(format!("{field}: {e}")))
}

/// Responder side: answer an initiator's identity and ephemeral keys.
///
/// Returns the new session and the keys to send back. Nothing is persisted
/// here; the caller commits the session before reporting success.
pub fn respond<E: Environment>(
    env: &E,
    identity: &KeyPair,
    peer_identity: &PublicKey,
    peer_ephemeral: &PublicKey,
) -> Result<(RatchetSession, HandshakeResponse)> {
    let ephemeral = KeyPair::from_secret_bytes(env.random_key());

    let dh1 = identity.diffie_hellman(peer_ephemeral).map_err(dh_failed)?;
    let dh2 = ephemeral.diffie_hellman(peer_identity).map_err(dh_failed)?;
    let dh3 = ephemeral.diffie_hellman(peer_ephemeral).map_err(dh_failed)?;
    let root_key = derive_handshake_root(&dh1, &dh2, &dh3);

    let response =
        HandshakeResponse { identity_key: identity.public(), ephemeral_key: ephemeral.public() };
    let session = RatchetSession::new(root_key, ephemeral, None);

    Ok((session, response))
}

/// Initiator side, step one: generate the ephemeral key to send.
pub fn begin<E: Environment>(env: &E) -> PendingHandshake {
    PendingHandshake { ephemeral: KeyPair::from_secret_bytes(env.random_key()) }
}

/// Initiator side, step two: derive the session from the responder's keys.
///
/// The initiator's sending ratchet key is its handshake ephemeral and its
/// receiving ratchet key is the responder's ephemeral, so it can send at once.
pub fn complete(
    pending: PendingHandshake,
    identity: &KeyPair,
    peer_identity: &PublicKey,
    peer_ephemeral: &PublicKey,
) -> Result<RatchetSession> {
    let ephemeral = pending.ephemeral;

    let dh1 = ephemeral.diffie_hellman(peer_identity).map_err(dh_failed)?;
    let dh2 = identity.diffie_hellman(peer_ephemeral).map_err(dh_failed)?;
    let dh3 = ephemeral.diffie_hellman(peer_ephemeral).map_err(dh_failed)?;
    let root_key = derive_handshake_root(&dh1, &dh2, &dh3);

    Ok(RatchetSession::new(root_key, ephemeral, Some(*peer_ephemeral)))
}

fn dh_failed(err: quorum_crypto::CryptoError) -> Error {
    Error::handshake(err.to_string())
}
