//! Error types for cryptographic primitives

use thiserror::Error;

/// Errors from key handling and AEAD operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material had the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Diffie-Hellman produced the all-zero output (low-order public key)
    #[error("non-contributory public key")]
    NonContributory,

    /// AEAD authentication tag did not verify
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl CryptoError {
    /// Returns true if the error was caused by malformed key material.
    ///
    /// Such errors can be caught at the API boundary and never reach the
    /// ratchet state.
    pub fn is_malformed_key(&self) -> bool {
        matches!(self, Self::InvalidKeyLength { .. } | Self::NonContributory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_errors_are_malformed_key() {
        assert!(CryptoError::InvalidKeyLength { expected: 32, actual: 31 }.is_malformed_key());
        assert!(CryptoError::NonContributory.is_malformed_key());
        assert!(!CryptoError::AuthenticationFailed.is_malformed_key());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(err.to_string(), "invalid key length: expected 32, got 16");
    }
}
