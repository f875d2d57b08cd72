//! Observable session state for invariant checking.
//!
//! Snapshots copy the public view of a [`RatchetSession`] (never key
//! material), so a trace can be checked after the fact.

use quorum_core::{PeerId, RatchetSession};
use quorum_crypto::PublicKey;

/// Public view of a ratchet session at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Key placed in outgoing headers.
    pub sending_key: PublicKey,
    /// Peer's current ratchet key.
    pub receiving_key: Option<PublicKey>,
    /// Next outgoing message number.
    pub send_message_number: u32,
    /// Next expected inbound message number.
    pub recv_message_number: u32,
    /// Number of cached skipped keys.
    pub skipped_keys: usize,
    /// Replaced receiving keys, oldest first.
    pub retired_keys: Vec<PublicKey>,
}

impl SessionSnapshot {
    /// Capture the observable state of a session.
    pub fn of(session: &RatchetSession) -> Self {
        Self {
            sending_key: session.sending_ratchet_key(),
            receiving_key: session.receiving_ratchet_key(),
            send_message_number: session.send_message_number(),
            recv_message_number: session.recv_message_number(),
            skipped_keys: session.skipped_keys().len(),
            retired_keys: session.retired_receiving_keys().copied().collect(),
        }
    }
}

/// Ordered snapshots of one session, one per operation.
#[derive(Debug, Clone)]
pub struct SessionTrace {
    /// Peer the session belongs to.
    pub peer: PeerId,
    /// Configured skipped-key capacity.
    pub max_skipped_keys: usize,
    /// Snapshots in operation order.
    pub states: Vec<SessionSnapshot>,
}

impl SessionTrace {
    /// Start an empty trace.
    pub fn new(peer: PeerId, max_skipped_keys: usize) -> Self {
        Self { peer, max_skipped_keys, states: Vec::new() }
    }

    /// Append the current state of the session.
    pub fn record(&mut self, session: &RatchetSession) {
        self.states.push(SessionSnapshot::of(session));
    }

    /// Number of recorded snapshots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
