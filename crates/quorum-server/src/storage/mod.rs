//! Storage backends for the server
//!
//! The [`Storage`] trait and [`MemoryStorage`] live in `quorum-core`; this
//! module adds the durable backend and a fault-injecting wrapper.

mod chaotic;
mod redb;

pub use chaotic::ChaoticStorage;
pub use quorum_core::storage::{MemoryStorage, Storage, StorageError};

pub use self::redb::RedbStorage;
