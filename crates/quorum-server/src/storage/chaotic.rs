//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling and
//! recovery. Used for chaos testing to ensure protocol state stays consistent
//! when writes are lost and later retried.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Storage, StorageError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. The failure rate can be
/// changed at runtime (e.g. to "heal" storage and verify recovery). Clones
/// share the RNG and the failure rate.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    chaos: Arc<Mutex<Chaos>>,
}

struct Chaos {
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: ChaoticRng,
    operation_count: usize,
    injected_failures: usize,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic randomness.
/// This ensures chaos tests are reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// `failure_rate` is clamped to [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            chaos: Arc::new(Mutex::new(Chaos {
                failure_rate: failure_rate.clamp(0.0, 1.0),
                rng: ChaoticRng::new(seed),
                operation_count: 0,
                injected_failures: 0,
            })),
        }
    }

    /// Change the failure rate for subsequent operations.
    pub fn set_failure_rate(&self, failure_rate: f64) {
        self.lock().failure_rate = failure_rate.clamp(0.0, 1.0);
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.lock().operation_count
    }

    /// Number of operations that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.lock().injected_failures
    }

    /// Count the operation and decide whether it fails.
    fn roll(&self) -> Result<(), StorageError> {
        let mut chaos = self.lock();
        chaos.operation_count += 1;

        let rate = chaos.failure_rate;
        if chaos.rng.next() < rate {
            chaos.injected_failures += 1;
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Chaos> {
        self.chaos.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.roll()?;
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.save(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.delete(key)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.roll()?;
        self.inner.list_keys(prefix)
    }
}
