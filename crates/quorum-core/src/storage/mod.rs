//! Storage abstraction for persisted protocol state
//!
//! A flat key-value store holding CBOR-encoded records. The trait is
//! synchronous (no async) to keep the protocol logic free of a runtime.
//!
//! # Key Layout
//!
//! ```text
//! identity          -> KeyPair (local long-term identity)
//! session/<peer>    -> RatchetSession
//! group/<group>     -> GroupSession
//! ```

mod error;
mod memory;

pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Serialize, de::DeserializeOwned};

/// Storage key of the local identity key pair
pub const IDENTITY_KEY: &str = "identity";

/// Key prefix of pairwise ratchet sessions
pub const SESSION_PREFIX: &str = "session/";

/// Key prefix of group sessions
pub const GROUP_PREFIX: &str = "group/";

/// Key-value storage for protocol state
///
/// Must be Clone (shared between the session store and the group manager),
/// Send + Sync (thread-safe), and synchronous (no async methods).
/// Implementations typically share internal state via Arc, so clones access
/// the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Load the value stored under `key`.
    ///
    /// Returns `None` if nothing is stored under this key.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, overwriting any existing value.
    ///
    /// # Invariants
    ///
    /// - Post: the value is durable when this returns `Ok` (for durable
    ///   backends)
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete the value stored under `key`.
    ///
    /// Idempotent: deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`. Order is not guaranteed.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Encode a record as CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decode a CBOR record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(ciborium::from_reader(bytes)?)
}

/// Load and decode the record stored under `key`.
pub fn load_record<S: Storage, T: DeserializeOwned>(
    storage: &S,
    key: &str,
) -> Result<Option<T>, StorageError> {
    storage.load(key)?.map(|bytes| decode(&bytes)).transpose()
}

/// Encode and store a record under `key`.
pub fn save_record<S: Storage, T: Serialize>(
    storage: &S,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    storage.save(key, &encode(value)?)
}
