//! Engine configuration

use std::time::Duration;

/// Configuration of the session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of message keys derived for a single inbound message.
    ///
    /// Bounds the work an attacker can force with a huge message number.
    pub max_skip: u32,

    /// Maximum number of cached skipped keys per session (oldest evicted
    /// first).
    pub max_skipped_keys: usize,

    /// How long a skipped key is kept before garbage collection.
    pub skipped_key_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_skip: 1000,
            max_skipped_keys: 2000,
            skipped_key_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}
