//! Long-term identity key of the local party

use quorum_crypto::{KeyPair, PublicKey};
use tracing::info;

use crate::{
    env::Environment,
    error::Result,
    storage::{IDENTITY_KEY, Storage, load_record, save_record},
};

/// Owns the local X25519 identity key pair.
///
/// Created once, persisted under [`IDENTITY_KEY`], loaded at every startup and
/// never rotated.
#[derive(Debug, Clone)]
pub struct IdentityKeyStore {
    key_pair: KeyPair,
}

impl IdentityKeyStore {
    /// Load the stored identity, or create and persist a new one.
    ///
    /// # Errors
    ///
    /// - `Persistence`: storage failed, or the stored identity is corrupted.
    ///   A corrupted identity is never silently replaced.
    pub fn load_or_create<E: Environment, S: Storage>(env: &E, storage: &S) -> Result<Self> {
        if let Some(key_pair) = load_record::<S, KeyPair>(storage, IDENTITY_KEY)? {
            info!(public_key = ?key_pair.public(), "Loaded identity key");
            return Ok(Self { key_pair });
        }

        let key_pair = KeyPair::from_secret_bytes(env.random_key());
        save_record(storage, IDENTITY_KEY, &key_pair)?;
        info!(public_key = ?key_pair.public(), "Created identity key");

        Ok(Self { key_pair })
    }

    /// Public identity key, sent in handshake frames.
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public()
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}
