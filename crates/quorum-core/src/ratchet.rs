//! Double Ratchet message encryption and decryption
//!
//! Operates on a caller-owned [`RatchetSession`]. The session store hands in
//! a working copy and commits it only when the operation succeeds, so a failed
//! decrypt (bad tag, skip limit) never advances the stored session.
//!
//! # Receiving
//!
//! ```text
//! header key cached?     ─yes─► open with cached key (consumed)
//!        │no
//! header key new?        ─yes─► retired? ─yes─► KeyNotFound
//!        │no                        │no
//!        │                 cache rest of old chain up to `pn`
//!        │                 DH ratchet step (new receiving chain)
//!        │                 fresh sending key pair, sending chain cleared
//!        ▼                          │
//! n < recv  ─► KeyNotFound          │
//! n >= recv ─► cache recv..n, derive key n  ◄──┘
//!        ▼
//! AEAD open
//! ```

use quorum_crypto::{ChainKey, KeyPair, MessageKey, PublicKey, kdf_root, open, seal};
use tracing::{debug, trace};

use crate::{
    config::EngineConfig,
    env::Environment,
    error::{Error, Result},
    ids::PeerId,
    message::{EncryptedEnvelope, MessageHeader},
    session::{RatchetSession, SkippedKeyId},
};

/// Stateless Double Ratchet operations, parameterized by the engine limits.
#[derive(Debug, Clone)]
pub struct DoubleRatchet {
    config: EngineConfig,
}

impl DoubleRatchet {
    /// Create with the given limits.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Encrypt `plaintext` for the peer, advancing the sending chain.
    ///
    /// Performs a DH ratchet step first if there is no sending chain.
    ///
    /// # Errors
    ///
    /// - `SessionNotReady`: responder session that has not received a message
    pub fn encrypt<E: Environment>(
        &self,
        env: &E,
        peer: &PeerId,
        session: &mut RatchetSession,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope> {
        let message_key = match session.sending_chain.as_mut() {
            Some(chain) => chain.step(),
            None => {
                let Some(their_key) = session.receiving_ratchet else {
                    return Err(Error::SessionNotReady(peer.clone()));
                };
                let dh = session.sending_ratchet.diffie_hellman(&their_key)?;
                let (root_key, chain_key) = kdf_root(&session.root_key, &dh);

                session.root_key = root_key;
                session.previous_sending_chain_length = session.send_message_number;
                session.send_message_number = 0;

                debug!(
                    %peer,
                    previous_chain_length = session.previous_sending_chain_length,
                    "Sending ratchet step"
                );
                session.sending_chain.insert(ChainKey::new(chain_key)).step()
            },
        };

        let header = MessageHeader {
            ratchet_key: session.sending_ratchet.public(),
            previous_chain_length: session.previous_sending_chain_length,
            message_number: session.send_message_number,
        };
        session.send_message_number = session.send_message_number.saturating_add(1);

        let mut nonce = [0u8; quorum_crypto::NONCE_SIZE];
        env.random_bytes(&mut nonce);
        let sealed = seal(message_key.key(), &nonce, &header.encode(), plaintext);

        trace!(%peer, message_number = header.message_number, "Encrypted message");

        Ok(EncryptedEnvelope {
            header,
            nonce,
            ciphertext: sealed.ciphertext,
            auth_tag: sealed.tag,
        })
    }

    /// Decrypt an envelope from the peer.
    ///
    /// `session` is mutated even on error; callers MUST discard it unless this
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound`: message key already consumed, or chain retired
    /// - `TooManySkipped`: message would require more than `max_skip` keys
    /// - `AuthenticationFailed`: tag did not verify
    pub fn decrypt<E: Environment>(
        &self,
        env: &E,
        peer: &PeerId,
        session: &mut RatchetSession,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>> {
        let header = &envelope.header;

        let cached = session.skipped.take(&header.ratchet_key, header.message_number);
        if let Some(message_key) = cached {
            trace!(%peer, message_number = header.message_number, "Using skipped message key");
            return open_envelope(&message_key, envelope);
        }

        if session.receiving_ratchet != Some(header.ratchet_key) {
            if session.is_retired(&header.ratchet_key) {
                return Err(Error::KeyNotFound { message_number: header.message_number });
            }
            self.skip_message_keys(env, session, header.previous_chain_length)?;
            self.receiving_ratchet_step(env, peer, session, header.ratchet_key)?;
        }

        if header.message_number < session.recv_message_number {
            return Err(Error::KeyNotFound { message_number: header.message_number });
        }

        self.check_skip(session.recv_message_number, header.message_number, 1)?;
        self.skip_message_keys(env, session, header.message_number)?;

        // Initiator before its first inbound message: the responder's
        // handshake key never carries a chain of its own
        let Some(chain) = session.receiving_chain.as_mut() else {
            return Err(Error::KeyNotFound { message_number: header.message_number });
        };
        let message_key = chain.step();
        session.recv_message_number = header.message_number.saturating_add(1);

        open_envelope(&message_key, envelope)
    }

    /// Cache keys of the current receiving chain up to (excluding) `until`.
    fn skip_message_keys<E: Environment>(
        &self,
        env: &E,
        session: &mut RatchetSession,
        until: u32,
    ) -> Result<()> {
        let (Some(chain), Some(ratchet_key)) =
            (session.receiving_chain.as_mut(), session.receiving_ratchet)
        else {
            return Ok(());
        };
        if until <= session.recv_message_number {
            return Ok(());
        }
        self.check_skip(session.recv_message_number, until, 0)?;

        let now = env.wall_clock_secs();
        let mut evicted = 0;
        for message_number in session.recv_message_number..until {
            let message_key = chain.step();
            evicted += session.skipped.insert(
                SkippedKeyId { ratchet_key, message_number },
                message_key,
                now,
                self.config.max_skipped_keys,
            );
        }
        session.recv_message_number = until;

        if evicted > 0 {
            debug!(evicted, "Skipped key cache full, evicted oldest keys");
        }
        Ok(())
    }

    /// Reject a chain advance from `from` to `to` (plus `extra` keys) that
    /// would exceed `max_skip` derivations.
    fn check_skip(&self, from: u32, to: u32, extra: u64) -> Result<()> {
        let requested = u64::from(to.saturating_sub(from)) + extra;
        if requested > u64::from(self.config.max_skip) {
            return Err(Error::TooManySkipped { requested, max_skip: self.config.max_skip });
        }
        Ok(())
    }

    /// New receiving chain for `their_key`, then a fresh sending key pair.
    fn receiving_ratchet_step<E: Environment>(
        &self,
        env: &E,
        peer: &PeerId,
        session: &mut RatchetSession,
        their_key: PublicKey,
    ) -> Result<()> {
        let dh = session.sending_ratchet.diffie_hellman(&their_key)?;
        let (root_key, chain_key) = kdf_root(&session.root_key, &dh);

        if let Some(old_key) = session.receiving_ratchet.replace(their_key) {
            session.retire_receiving_key(old_key);
        }
        session.root_key = root_key;
        session.receiving_chain = Some(ChainKey::new(chain_key));
        session.recv_message_number = 0;

        session.sending_ratchet = KeyPair::from_secret_bytes(env.random_key());
        session.sending_chain = None;

        debug!(%peer, "Receiving ratchet step");
        Ok(())
    }
}

fn open_envelope(message_key: &MessageKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
    open(
        message_key.key(),
        &envelope.nonce,
        &envelope.header.encode(),
        &envelope.ciphertext,
        &envelope.auth_tag,
    )
    .map_err(|_| Error::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::test_utils::MockEnv, handshake};

    struct Pair {
        env: MockEnv,
        ratchet: DoubleRatchet,
        client: RatchetSession,
        server: RatchetSession,
        peer: PeerId,
    }

    fn pair() -> Pair {
        let env = MockEnv::with_seed(42);
        let server_identity = KeyPair::from_secret_bytes(env.random_key());
        let client_identity = KeyPair::from_secret_bytes(env.random_key());

        let pending = handshake::begin(&env);
        let (server, response) = handshake::respond(
            &env,
            &server_identity,
            &client_identity.public(),
            &pending.ephemeral_key(),
        )
        .unwrap();
        let client = handshake::complete(
            pending,
            &client_identity,
            &response.identity_key,
            &response.ephemeral_key,
        )
        .unwrap();

        Pair {
            env,
            ratchet: DoubleRatchet::new(EngineConfig::default()),
            client,
            server,
            peer: PeerId::from("peer"),
        }
    }

    impl Pair {
        fn client_send(&mut self, plaintext: &[u8]) -> EncryptedEnvelope {
            self.ratchet.encrypt(&self.env, &self.peer, &mut self.client, plaintext).unwrap()
        }

        fn server_send(&mut self, plaintext: &[u8]) -> EncryptedEnvelope {
            self.ratchet.encrypt(&self.env, &self.peer, &mut self.server, plaintext).unwrap()
        }

        fn server_recv(&mut self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
            let mut working = self.server.clone();
            let result = self.ratchet.decrypt(&self.env, &self.peer, &mut working, envelope);
            if result.is_ok() {
                self.server = working;
            }
            result
        }

        fn client_recv(&mut self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
            let mut working = self.client.clone();
            let result = self.ratchet.decrypt(&self.env, &self.peer, &mut working, envelope);
            if result.is_ok() {
                self.client = working;
            }
            result
        }
    }

    #[test]
    fn round_trip_both_directions() {
        let mut p = pair();

        let m0 = p.client_send(b"hello server");
        assert_eq!(p.server_recv(&m0).unwrap(), b"hello server");

        let r0 = p.server_send(b"hello client");
        assert_eq!(p.client_recv(&r0).unwrap(), b"hello client");
    }

    #[test]
    fn responder_cannot_send_first() {
        let mut p = pair();
        let result = p.ratchet.encrypt(&p.env, &p.peer, &mut p.server, b"too early");
        assert!(matches!(result, Err(Error::SessionNotReady(_))));
    }

    #[test]
    fn sending_ratchet_step_restarts_numbering() {
        let mut p = pair();
        for i in 0..3u32 {
            let envelope = p.client_send(b"count");
            assert_eq!(envelope.header.message_number, i);
            assert_eq!(envelope.header.previous_chain_length, 0);
            p.server_recv(&envelope).unwrap();
        }

        let reply = p.server_send(b"ack");
        assert_eq!(reply.header.message_number, 0);
        p.client_recv(&reply).unwrap();

        let next = p.client_send(b"new chain");
        assert_eq!(next.header.message_number, 0);
        assert_eq!(next.header.previous_chain_length, 3);
        assert_eq!(p.client.send_message_number(), 1);
        assert_eq!(p.server_recv(&next).unwrap(), b"new chain");
    }

    #[test]
    fn out_of_order_within_chain() {
        let mut p = pair();
        let messages: Vec<_> = (0..5).map(|i| p.client_send(&[i])).collect();

        for index in [2usize, 0, 1, 3, 4] {
            assert_eq!(p.server_recv(&messages[index]).unwrap(), vec![index as u8]);
        }
        assert!(p.server.skipped_keys().is_empty());
    }

    #[test]
    fn skipped_key_is_single_use() {
        let mut p = pair();
        let m0 = p.client_send(b"zero");
        let m1 = p.client_send(b"one");

        p.server_recv(&m1).unwrap();
        p.server_recv(&m0).unwrap();

        let again = p.server_recv(&m0);
        assert!(matches!(again, Err(Error::KeyNotFound { message_number: 0 })));
    }

    #[test]
    fn replay_of_current_chain_message_fails() {
        let mut p = pair();
        let m0 = p.client_send(b"zero");
        p.server_recv(&m0).unwrap();

        assert!(matches!(p.server_recv(&m0), Err(Error::KeyNotFound { .. })));
    }

    #[test]
    fn gap_of_max_skip_is_rejected() {
        let mut p = pair();
        let mut last = p.client_send(b"0");
        for _ in 0..1000 {
            last = p.client_send(b"x");
        }
        assert_eq!(last.header.message_number, 1000);

        let before = p.server.clone();
        let result = p.server_recv(&last);
        assert!(matches!(result, Err(Error::TooManySkipped { requested: 1001, max_skip: 1000 })));
        assert_eq!(p.server.recv_message_number(), before.recv_message_number());
    }

    #[test]
    fn gap_just_below_limit_is_accepted() {
        let mut p = pair();
        let mut last = p.client_send(b"0");
        for _ in 0..999 {
            last = p.client_send(b"x");
        }
        assert_eq!(last.header.message_number, 999);

        assert_eq!(p.server_recv(&last).unwrap(), b"x");
        assert_eq!(p.server.skipped_keys().len(), 999);
    }

    #[test]
    fn tampered_message_leaves_session_untouched() {
        let mut p = pair();
        let mut m0 = p.client_send(b"secret");
        m0.auth_tag[0] ^= 0xFF;

        assert!(matches!(p.server_recv(&m0), Err(Error::AuthenticationFailed)));
        assert!(p.server.receiving_ratchet_key().is_none(), "no ratchet step committed");

        m0.auth_tag[0] ^= 0xFF;
        assert_eq!(p.server_recv(&m0).unwrap(), b"secret");
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let mut p = pair();
        p.client_send(b"zero");
        let mut m1 = p.client_send(b"one");
        m1.header.previous_chain_length = 7;

        assert!(matches!(p.server_recv(&m1), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn direction_flip_rotates_ratchet_key() {
        let mut p = pair();
        let m0 = p.client_send(b"ping");
        p.server_recv(&m0).unwrap();
        let r0 = p.server_send(b"pong");
        p.client_recv(&r0).unwrap();
        let m1 = p.client_send(b"ping again");

        assert_ne!(m0.header.ratchet_key, m1.header.ratchet_key);
        assert_eq!(m1.header.message_number, 0);
        assert_eq!(m1.header.previous_chain_length, 1);
        assert_eq!(p.server_recv(&m1).unwrap(), b"ping again");
    }

    #[test]
    fn late_message_from_previous_chain() {
        let mut p = pair();
        let m0 = p.client_send(b"zero");
        let m1 = p.client_send(b"one");
        p.server_recv(&m0).unwrap();

        let r0 = p.server_send(b"reply");
        p.client_recv(&r0).unwrap();
        let m2 = p.client_send(b"new chain");

        // Arrives before the late m1: old chain keys are cached up to pn = 2
        assert_eq!(p.server_recv(&m2).unwrap(), b"new chain");
        assert_eq!(p.server_recv(&m1).unwrap(), b"one");
    }

    #[test]
    fn forged_message_on_handshake_key_is_rejected() {
        let mut p = pair();
        let forged = EncryptedEnvelope {
            header: MessageHeader {
                ratchet_key: p.client.receiving_ratchet_key().unwrap(),
                previous_chain_length: 0,
                message_number: 0,
            },
            nonce: [0; 12],
            ciphertext: b"forged".to_vec(),
            auth_tag: [0; 16],
        };

        assert!(matches!(p.client_recv(&forged), Err(Error::KeyNotFound { .. })));
    }

    #[test]
    fn message_on_retired_chain_without_cached_key_fails() {
        let mut p = pair();
        let m0 = p.client_send(b"zero");
        p.server_recv(&m0).unwrap();
        let r0 = p.server_send(b"reply");
        p.client_recv(&r0).unwrap();
        let m1 = p.client_send(b"next chain");
        p.server_recv(&m1).unwrap();

        // Replay of m0: its chain is retired and its key was consumed
        assert!(matches!(p.server_recv(&m0), Err(Error::KeyNotFound { .. })));
        assert!(p.server.retired_receiving_keys().any(|key| *key == m0.header.ratchet_key));
    }
}
