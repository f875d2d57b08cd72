//! Pairwise Double Ratchet session state
//!
//! A [`RatchetSession`] is plain data: it is created by the handshake, mutated
//! only by [`crate::ratchet::DoubleRatchet`] on a working copy, and persisted
//! by [`crate::store::SessionStore`] as CBOR.

use std::collections::{BTreeMap, VecDeque};

use quorum_crypto::{ChainKey, Key32, KeyPair, MessageKey, PublicKey};
use serde::{Deserialize, Serialize};

/// Number of replaced receiving ratchet keys remembered per session
pub const MAX_RETIRED_KEYS: usize = 16;

/// Per-peer Double Ratchet state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetSession {
    pub(crate) root_key: Key32,
    pub(crate) sending_chain: Option<ChainKey>,
    pub(crate) receiving_chain: Option<ChainKey>,
    pub(crate) sending_ratchet: KeyPair,
    pub(crate) receiving_ratchet: Option<PublicKey>,
    pub(crate) previous_sending_chain_length: u32,
    pub(crate) send_message_number: u32,
    pub(crate) recv_message_number: u32,
    pub(crate) skipped: SkippedKeys,
    pub(crate) retired_receiving_keys: VecDeque<PublicKey>,
}

impl RatchetSession {
    /// Fresh session straight out of a handshake (no chain keys yet).
    pub(crate) fn new(
        root_key: Key32,
        sending_ratchet: KeyPair,
        receiving_ratchet: Option<PublicKey>,
    ) -> Self {
        Self {
            root_key,
            sending_chain: None,
            receiving_chain: None,
            sending_ratchet,
            receiving_ratchet,
            previous_sending_chain_length: 0,
            send_message_number: 0,
            recv_message_number: 0,
            skipped: SkippedKeys::default(),
            retired_receiving_keys: VecDeque::new(),
        }
    }

    /// Public key placed in the header of outgoing messages.
    pub fn sending_ratchet_key(&self) -> PublicKey {
        self.sending_ratchet.public()
    }

    /// Peer's current ratchet key, `None` until the first inbound message
    /// (responder side).
    pub fn receiving_ratchet_key(&self) -> Option<PublicKey> {
        self.receiving_ratchet
    }

    /// Number of the next outgoing message on the current sending chain.
    pub fn send_message_number(&self) -> u32 {
        self.send_message_number
    }

    /// Number of the next expected message on the current receiving chain.
    pub fn recv_message_number(&self) -> u32 {
        self.recv_message_number
    }

    /// Length of the previous sending chain, sent in every header.
    pub fn previous_sending_chain_length(&self) -> u32 {
        self.previous_sending_chain_length
    }

    /// Whether `encrypt` can run (a sending chain exists or can be derived).
    pub fn can_send(&self) -> bool {
        self.sending_chain.is_some() || self.receiving_ratchet.is_some()
    }

    /// Cached keys for messages that have not arrived yet.
    pub fn skipped_keys(&self) -> &SkippedKeys {
        &self.skipped
    }

    /// Receiving ratchet keys that were replaced by a DH ratchet step.
    pub fn retired_receiving_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.retired_receiving_keys.iter()
    }

    pub(crate) fn retire_receiving_key(&mut self, key: PublicKey) {
        if self.retired_receiving_keys.len() == MAX_RETIRED_KEYS {
            self.retired_receiving_keys.pop_front();
        }
        self.retired_receiving_keys.push_back(key);
    }

    pub(crate) fn is_retired(&self, key: &PublicKey) -> bool {
        self.retired_receiving_keys.contains(key)
    }
}

/// Identifies a skipped message key: ratchet public key and message number.
///
/// Message numbers restart at 0 on every DH ratchet step, so the ratchet key
/// is needed to tell chains apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkippedKeyId {
    /// Ratchet public key of the chain the key belongs to
    pub ratchet_key: PublicKey,
    /// Message number within that chain
    pub message_number: u32,
}

#[derive(Debug, Clone)]
struct SkippedKey {
    key: MessageKey,
    created_at_secs: u64,
    seq: u64,
}

/// Persisted form of one cached key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedKeyEntry {
    id: SkippedKeyId,
    key: MessageKey,
    created_at_secs: u64,
}

/// Cache of message keys for messages that were skipped over.
///
/// Keys are consumed exactly once. Eviction is oldest-first when the cache
/// exceeds its capacity, and by age during garbage collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<SkippedKeyEntry>", into = "Vec<SkippedKeyEntry>")]
pub struct SkippedKeys {
    entries: BTreeMap<SkippedKeyId, SkippedKey>,
    /// Insertion order, `seq -> id`
    order: BTreeMap<u64, SkippedKeyId>,
    next_seq: u64,
}

impl SkippedKeys {
    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no keys are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a key is cached for this chain position.
    pub fn contains(&self, ratchet_key: &PublicKey, message_number: u32) -> bool {
        self.entries.contains_key(&SkippedKeyId { ratchet_key: *ratchet_key, message_number })
    }

    /// Creation time of the oldest cached key.
    pub fn oldest_created_at_secs(&self) -> Option<u64> {
        self.entries.values().map(|entry| entry.created_at_secs).min()
    }

    /// Cache a key, evicting the oldest entries beyond `capacity`.
    ///
    /// Returns the number of evicted keys.
    pub(crate) fn insert(
        &mut self,
        id: SkippedKeyId,
        key: MessageKey,
        created_at_secs: u64,
        capacity: usize,
    ) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(previous) = self.entries.insert(id, SkippedKey { key, created_at_secs, seq }) {
            self.order.remove(&previous.seq);
        }
        self.order.insert(seq, id);

        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    /// Remove and return the key for this chain position.
    pub(crate) fn take(
        &mut self,
        ratchet_key: &PublicKey,
        message_number: u32,
    ) -> Option<MessageKey> {
        let id = SkippedKeyId { ratchet_key: *ratchet_key, message_number };
        let entry = self.entries.remove(&id)?;
        self.order.remove(&entry.seq);
        Some(entry.key)
    }

    /// Drop every key created at or before `cutoff_secs`.
    ///
    /// Returns the number of removed keys.
    pub(crate) fn purge_created_before(&mut self, cutoff_secs: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created_at_secs > cutoff_secs);
        let entries = &self.entries;
        self.order.retain(|_, id| entries.contains_key(id));
        before - self.entries.len()
    }
}

impl From<Vec<SkippedKeyEntry>> for SkippedKeys {
    fn from(persisted: Vec<SkippedKeyEntry>) -> Self {
        let mut keys = SkippedKeys::default();
        for entry in persisted {
            keys.insert(entry.id, entry.key, entry.created_at_secs, usize::MAX);
        }
        keys
    }
}

impl From<SkippedKeys> for Vec<SkippedKeyEntry> {
    fn from(keys: SkippedKeys) -> Self {
        let SkippedKeys { mut entries, order, .. } = keys;
        order
            .into_values()
            .filter_map(|id| {
                entries.remove(&id).map(|entry| SkippedKeyEntry {
                    id,
                    key: entry.key,
                    created_at_secs: entry.created_at_secs,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use quorum_crypto::Key32;

    use super::*;
    use crate::storage::{decode, encode};

    fn ratchet_key(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    fn message_key(byte: u8) -> MessageKey {
        MessageKey::from_key(Key32::from_bytes([byte; 32]))
    }

    fn id(byte: u8, message_number: u32) -> SkippedKeyId {
        SkippedKeyId { ratchet_key: ratchet_key(byte), message_number }
    }

    #[test]
    fn take_consumes_key_once() {
        let mut keys = SkippedKeys::default();
        keys.insert(id(1, 3), message_key(9), 100, 10);

        assert_eq!(keys.take(&ratchet_key(1), 3), Some(message_key(9)));
        assert_eq!(keys.take(&ratchet_key(1), 3), None);
        assert!(keys.is_empty());
    }

    #[test]
    fn same_number_on_different_chains_does_not_collide() {
        let mut keys = SkippedKeys::default();
        keys.insert(id(1, 0), message_key(1), 100, 10);
        keys.insert(id(2, 0), message_key(2), 100, 10);

        assert_eq!(keys.len(), 2);
        assert_eq!(keys.take(&ratchet_key(2), 0), Some(message_key(2)));
        assert_eq!(keys.take(&ratchet_key(1), 0), Some(message_key(1)));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut keys = SkippedKeys::default();
        for n in 0..5 {
            keys.insert(id(1, n), message_key(n as u8), 100, 3);
        }

        assert_eq!(keys.len(), 3);
        assert!(!keys.contains(&ratchet_key(1), 0));
        assert!(!keys.contains(&ratchet_key(1), 1));
        assert!(keys.contains(&ratchet_key(1), 4));
    }

    #[test]
    fn purge_removes_only_expired() {
        let mut keys = SkippedKeys::default();
        keys.insert(id(1, 0), message_key(0), 100, 10);
        keys.insert(id(1, 1), message_key(1), 200, 10);

        assert_eq!(keys.purge_created_before(100), 1);
        assert!(keys.contains(&ratchet_key(1), 1));
        assert_eq!(keys.oldest_created_at_secs(), Some(200));
    }

    #[test]
    fn persisted_form_keeps_insertion_order() {
        let mut keys = SkippedKeys::default();
        keys.insert(id(2, 0), message_key(0), 100, 10);
        keys.insert(id(1, 5), message_key(1), 100, 10);
        keys.insert(id(1, 6), message_key(2), 100, 10);

        let mut restored: SkippedKeys = decode(&encode(&keys).unwrap()).unwrap();
        assert_eq!(restored.len(), 3);

        // Evicting one entry must drop the first inserted, not the smallest id
        restored.insert(id(3, 0), message_key(3), 100, 3);
        assert!(!restored.contains(&ratchet_key(2), 0));
        assert!(restored.contains(&ratchet_key(1), 5));
    }

    #[test]
    fn retired_keys_are_bounded() {
        let mut session = RatchetSession::new(
            Key32::from_bytes([0; 32]),
            KeyPair::from_secret_bytes([1; 32]),
            None,
        );
        for byte in 0..(MAX_RETIRED_KEYS as u8 + 4) {
            session.retire_receiving_key(ratchet_key(byte));
        }

        assert_eq!(session.retired_receiving_keys().count(), MAX_RETIRED_KEYS);
        assert!(!session.is_retired(&ratchet_key(0)));
        assert!(session.is_retired(&ratchet_key(MAX_RETIRED_KEYS as u8 + 3)));
    }

    #[test]
    fn responder_session_cannot_send_before_receiving() {
        let session = RatchetSession::new(
            Key32::from_bytes([0; 32]),
            KeyPair::from_secret_bytes([1; 32]),
            None,
        );
        assert!(!session.can_send());
    }
}
