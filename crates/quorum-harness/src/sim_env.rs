//! Simulated environment with a virtual clock and seeded randomness.
//!
//! Time only moves when a test calls [`SimEnv::advance`] (or a driver sleeps),
//! and randomness is a ChaCha20 stream derived from a `u64` seed. Two
//! environments built from the same seed produce identical keys, nonces and
//! timestamps.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use quorum_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall clock at simulation start (2024-01-01T00:00:00Z)
pub const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Virtual instant: time elapsed since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Elapsed virtual time since simulation start.
    pub fn elapsed_since_start(self) -> Duration {
        self.0
    }
}

impl std::ops::Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Deterministic [`Environment`] for simulation tests.
///
/// Clones share the same clock and RNG stream.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    elapsed: Arc<Mutex<Duration>>,
}

impl SimEnv {
    /// Create an environment from a seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the virtual clock forward (monotonic and wall clock).
    pub fn advance(&self, by: Duration) {
        *self.lock_elapsed() += by;
    }

    /// Virtual time elapsed since simulation start.
    pub fn elapsed(&self) -> Duration {
        *self.lock_elapsed()
    }

    fn lock_elapsed(&self) -> MutexGuard<'_, Duration> {
        self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn wall_clock_secs(&self) -> u64 {
        SIM_EPOCH_SECS + self.elapsed().as_secs()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        // Sleeping is instantaneous in simulation: the clock jumps forward.
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
