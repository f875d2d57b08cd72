//! Message framing with `ChaCha20-Poly1305`
//!
//! All functions are pure. The nonce is provided by the caller, which MUST
//! use cryptographically secure random bytes in production. The tag is
//! detached so that the wire format can carry it as its own field.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};

use crate::{error::CryptoError, keys::Key32};

/// Nonce size (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Ciphertext with its detached authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Encrypted payload, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Poly1305 authentication tag
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt and authenticate `plaintext`, binding `aad`.
pub fn seal(key: &Key32, nonce: &[u8; NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Sealed {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut ciphertext = plaintext.to_vec();
    let Ok(tag) = cipher.encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut ciphertext)
    else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail below the 256 GiB limit");
    };

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);
    Sealed { ciphertext, tag: tag_bytes }
}

/// Verify and decrypt a sealed payload.
///
/// # Errors
///
/// - `AuthenticationFailed`: wrong key, nonce, aad, or tampered ciphertext/tag
pub fn open(
    key: &Key32,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut plaintext = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut plaintext,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(plaintext)
}
