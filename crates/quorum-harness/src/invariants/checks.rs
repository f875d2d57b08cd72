//! Standard session invariants.

use quorum_core::session::MAX_RETIRED_KEYS;

use super::{Invariant, InvariantResult, SessionTrace, Violation};

/// The skipped-key cache never grows past its configured capacity.
pub struct SkippedKeysBounded;

impl Invariant for SkippedKeysBounded {
    fn name(&self) -> &'static str {
        "SkippedKeysBounded"
    }

    fn check(&self, trace: &SessionTrace) -> InvariantResult {
        for (step, state) in trace.states.iter().enumerate() {
            if state.skipped_keys > trace.max_skipped_keys {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "peer {} step {step}: {} skipped keys exceeds capacity {}",
                        trace.peer, state.skipped_keys, trace.max_skipped_keys
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Retired receiving keys are bounded and never include the live key.
pub struct RetiredKeysBounded;

impl Invariant for RetiredKeysBounded {
    fn name(&self) -> &'static str {
        "RetiredKeysBounded"
    }

    fn check(&self, trace: &SessionTrace) -> InvariantResult {
        for (step, state) in trace.states.iter().enumerate() {
            if state.retired_keys.len() > MAX_RETIRED_KEYS {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "peer {} step {step}: {} retired keys",
                        trace.peer,
                        state.retired_keys.len()
                    ),
                });
            }
            if let Some(live) = state.receiving_key
                && state.retired_keys.contains(&live)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("peer {} step {step}: live receiving key is retired", trace.peer),
                });
            }
        }
        Ok(())
    }
}

/// Message counters never decrease while the ratchet key stays the same.
pub struct CounterMonotonicity;

impl Invariant for CounterMonotonicity {
    fn name(&self) -> &'static str {
        "CounterMonotonicity"
    }

    fn check(&self, trace: &SessionTrace) -> InvariantResult {
        for (step, pair) in trace.states.windows(2).enumerate() {
            let (before, after) = (&pair[0], &pair[1]);

            if before.sending_key == after.sending_key
                && after.send_message_number < before.send_message_number
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "peer {} step {}: send counter decreased {} → {}",
                        trace.peer,
                        step + 1,
                        before.send_message_number,
                        after.send_message_number
                    ),
                });
            }

            if before.receiving_key.is_some()
                && before.receiving_key == after.receiving_key
                && after.recv_message_number < before.recv_message_number
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "peer {} step {}: receive counter decreased {} → {}",
                        trace.peer,
                        step + 1,
                        before.recv_message_number,
                        after.recv_message_number
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quorum_crypto::PublicKey;

    use super::*;
    use crate::invariants::SessionSnapshot;

    fn state(send: u32, recv: u32) -> SessionSnapshot {
        SessionSnapshot {
            sending_key: PublicKey::from_bytes([1; 32]),
            receiving_key: Some(PublicKey::from_bytes([2; 32])),
            send_message_number: send,
            recv_message_number: recv,
            skipped_keys: 0,
            retired_keys: Vec::new(),
        }
    }

    fn trace(states: Vec<SessionSnapshot>) -> SessionTrace {
        SessionTrace { peer: "peer".into(), max_skipped_keys: 4, states }
    }

    #[test]
    fn decreasing_send_counter_detected() {
        let result = CounterMonotonicity.check(&trace(vec![state(3, 0), state(2, 0)]));
        assert!(result.is_err());
    }

    #[test]
    fn counter_reset_on_new_key_allowed() {
        let mut next = state(0, 0);
        next.sending_key = PublicKey::from_bytes([9; 32]);
        assert!(CounterMonotonicity.check(&trace(vec![state(5, 0), next])).is_ok());
    }

    #[test]
    fn skipped_capacity_detected() {
        let mut full = state(0, 0);
        full.skipped_keys = 5;
        assert!(SkippedKeysBounded.check(&trace(vec![full])).is_err());
    }

    #[test]
    fn retired_live_key_detected() {
        let mut bad = state(0, 0);
        bad.retired_keys.push(PublicKey::from_bytes([2; 32]));
        assert!(RetiredKeysBounded.check(&trace(vec![bad])).is_err());
    }
}
