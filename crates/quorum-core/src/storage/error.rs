//! Storage error types.
//!
//! - `Serialization`: failed to encode/decode persisted state
//! - `Io`: underlying storage system errors

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns true if the operation may succeed on retry.
    ///
    /// Corrupted records never heal by themselves; I/O failures might.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl<T: std::fmt::Debug> From<ciborium::ser::Error<T>> for StorageError {
    fn from(err: ciborium::ser::Error<T>) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl<T: std::fmt::Debug> From<ciborium::de::Error<T>> for StorageError {
    fn from(err: ciborium::de::Error<T>) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
