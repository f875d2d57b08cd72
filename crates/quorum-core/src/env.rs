//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). Enables
//! deterministic simulation (virtual clock, seeded RNG) and production use
//! with real system resources.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Seconds since the Unix epoch.
    ///
    /// Used to timestamp persisted state (skipped message keys) so that
    /// retention survives restarts. Not guaranteed to be monotonic.
    fn wall_clock_secs(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates 32 random bytes (key material).
    fn random_key(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.random_bytes(&mut bytes);
        bytes
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Environment, test_utils::MockEnv};

    #[test]
    fn mock_env_is_deterministic() {
        let a = MockEnv::with_seed(7);
        let b = MockEnv::with_seed(7);

        assert_eq!(a.random_key(), b.random_key());
        assert_eq!(a.random_key(), b.random_key());
    }

    #[test]
    fn mock_env_random_stream_advances() {
        let env = MockEnv::with_seed(7);
        assert_ne!(env.random_key(), env.random_key());
    }

    #[test]
    fn mock_wall_clock_advances_only_on_request() {
        let env = MockEnv::default();
        let start = env.wall_clock_secs();
        assert_eq!(env.wall_clock_secs(), start);

        env.advance_wall_clock(Duration::from_secs(90));
        assert_eq!(env.wall_clock_secs(), start + 90);
    }
}
