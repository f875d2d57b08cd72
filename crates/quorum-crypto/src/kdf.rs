//! HKDF-SHA256 derivations for the handshake, the DH ratchet and group epochs

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{KEY_SIZE, Key32};

/// Info label for the handshake root key derivation
pub const HANDSHAKE_INFO: &[u8] = b"QuorumSignalProtocolV1";

/// Info label for root key / chain key derivation in the DH ratchet
const RATCHET_INFO: &[u8] = b"QuorumRatchet";

/// Info label for mixing fresh randomness into a group key
const EPOCH_ADVANCE_INFO: &[u8] = b"epoch-advance";

/// Derive the initial root key from the three handshake DH outputs.
///
/// The DH outputs must be concatenated in the same order on both sides:
/// `DH(A_identity, B_ephemeral) ‖ DH(A_ephemeral, B_identity) ‖
/// DH(A_ephemeral, B_ephemeral)` where A is the responder.
pub fn derive_handshake_root(dh1: &Key32, dh2: &Key32, dh3: &Key32) -> Key32 {
    let mut ikm = [0u8; 3 * KEY_SIZE];
    ikm[..KEY_SIZE].copy_from_slice(dh1.as_bytes());
    ikm[KEY_SIZE..2 * KEY_SIZE].copy_from_slice(dh2.as_bytes());
    ikm[2 * KEY_SIZE..].copy_from_slice(dh3.as_bytes());

    let root = expand_32(Some(&[0u8; KEY_SIZE]), &ikm, HANDSHAKE_INFO);
    ikm.zeroize();
    root
}

/// DH ratchet step: mix a DH output into the root key.
///
/// Returns `(new_root_key, chain_key)`.
pub fn kdf_root(root_key: &Key32, dh_output: &Key32) -> (Key32, Key32) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_bytes()), dh_output.as_bytes());

    let mut okm = [0u8; 2 * KEY_SIZE];
    let Ok(()) = hkdf.expand(RATCHET_INFO, &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut root = [0u8; KEY_SIZE];
    let mut chain = [0u8; KEY_SIZE];
    root.copy_from_slice(&okm[..KEY_SIZE]);
    chain.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();

    (Key32::from_bytes(root), Key32::from_bytes(chain))
}

/// Derive the epoch 0 key of a group from a random seed.
///
/// `label` is the group id, so two groups created from the same seed still
/// get distinct keys.
pub fn derive_group_key(seed: &Key32, label: &[u8]) -> Key32 {
    expand_32(None, seed.as_bytes(), label)
}

/// Derive the next epoch's group key from the current key and fresh randomness.
pub fn advance_group_key(current: &Key32, fresh: &Key32) -> Key32 {
    let mut ikm = [0u8; 2 * KEY_SIZE];
    ikm[..KEY_SIZE].copy_from_slice(current.as_bytes());
    ikm[KEY_SIZE..].copy_from_slice(fresh.as_bytes());

    let next = expand_32(None, &ikm, EPOCH_ADVANCE_INFO);
    ikm.zeroize();
    next
}

/// Expand 32 bytes of output key material.
pub(crate) fn expand_32(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> Key32 {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);

    let mut out = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(info, &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    Key32::from_bytes(out)
}
