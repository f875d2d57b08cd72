//! Environment backed by the operating system.
//!
//! Identity keys, ratchet key pairs, group seeds and AEAD nonces all come from
//! [`Environment::random_bytes`], so this is the one place where randomness
//! quality matters. Time is real: skipped-key timestamps use the system wall
//! clock and maintenance sleeps on the Tokio timer.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use quorum_core::Environment;

/// OS clock, OS RNG and Tokio sleep.
///
/// # Panics
///
/// `random_bytes` panics if `getrandom` fails. Carrying on would mean
/// predictable keys and repeated nonces.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    /// Seconds since the Unix epoch; 0 if the clock is set before it, which
    /// only makes skipped keys look older to GC.
    fn wall_clock_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |since| since.as_secs())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG is available, key material depends on it");
    }
}
