//! Deterministic simulation harness for Quorum protocol testing.
//!
//! Seeded implementations of the core's [`quorum_core::Environment`] trait
//! and a wire-level client, so that whole conversations (handshake, message
//! loss, reordering, restarts) replay bit-for-bit from a seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module verifies properties of recorded session traces.
//! Use [`InvariantRegistry::standard()`] for the common ratchet invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_client;
pub mod sim_env;

pub use invariants::{
    CounterMonotonicity, Invariant, InvariantRegistry, InvariantResult, RetiredKeysBounded,
    SessionSnapshot, SessionTrace, SkippedKeysBounded, Violation,
};
pub use sim_client::{Received, SimClient};
pub use sim_env::{SIM_EPOCH_SECS, SimEnv, SimInstant};
