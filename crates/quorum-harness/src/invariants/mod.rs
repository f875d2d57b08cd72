//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties of a session that must hold after every
//! operation, whatever the delivery order. Tests record a [`SessionTrace`]
//! (one snapshot per operation) and run the registered checks over it.
//!
//! # Usage
//!
//! ```ignore
//! let mut trace = SessionTrace::new(peer.clone(), config.max_skipped_keys);
//! trace.record(&engine.session_snapshot(&peer)?.unwrap());
//! InvariantRegistry::standard().assert_all(&trace, "after delivery");
//! ```

mod checks;
mod snapshot;

pub use checks::{CounterMonotonicity, RetiredKeysBounded, SkippedKeysBounded};
pub use snapshot::{SessionSnapshot, SessionTrace};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a recorded session trace.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the trace.
    fn check(&self, trace: &SessionTrace) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every session invariant.
    ///
    /// Includes:
    /// - [`SkippedKeysBounded`]: the skipped-key cache never exceeds its
    ///   capacity
    /// - [`RetiredKeysBounded`]: retired ratchet keys are bounded and never
    ///   include the live receiving key
    /// - [`CounterMonotonicity`]: message counters never decrease for a fixed
    ///   ratchet key
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SkippedKeysBounded);
        registry.add(RetiredKeysBounded);
        registry.add(CounterMonotonicity);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the trace.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, trace: &SessionTrace) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(trace).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic, reason = "test assertion helper")]
    pub fn assert_all(&self, trace: &SessionTrace, context: &str) {
        if let Err(violations) = self.check_all(trace) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn empty_trace_passes_invariants() {
        let registry = InvariantRegistry::standard();
        let trace = SessionTrace::new("peer".into(), 10);
        assert!(registry.check_all(&trace).is_ok());
    }
}
