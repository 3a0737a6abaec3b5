//! Seed sealing for storage at rest using `XChaCha20-Poly1305`
//!
//! All functions are pure - the random nonce must be provided by the caller.

use std::fmt;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    error::CryptoError,
    seed::{EPHEMERAL_SEED_SIZE, EphemeralSeed},
};

/// Size of the `XChaCha20` nonce prefixed to every sealed seed
pub const SEAL_NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Length of a sealed seed: nonce, ciphertext, tag
pub const SEALED_SEED_SIZE: usize = SEAL_NONCE_SIZE + EPHEMERAL_SEED_SIZE + POLY1305_TAG_SIZE;

/// Symmetric key protecting seeds in the local store.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StoreKey([u8; 32]);

impl StoreKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded 32-byte key.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|e| CryptoError::Encoding(e.to_string()))?,
        );
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, actual: bytes.len() })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreKey(<redacted>)")
    }
}

/// Seal a seed.
///
/// Returns `nonce || ciphertext || tag`. The `aad` binds the sealed bytes to
/// their storage slot so they cannot be moved to another one.
///
/// # Security
///
/// - Caller MUST provide a fresh random nonce for every call
/// - Authenticated encryption prevents tampering
pub fn seal_seed(
    key: &StoreKey,
    aad: &[u8],
    seed: &EphemeralSeed,
    nonce: [u8; SEAL_NONCE_SIZE],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new((&key.0).into());

    let Ok(ciphertext) = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: seed.as_bytes(), aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(SEALED_SEED_SIZE);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed
}

/// Open a sealed seed.
///
/// # Errors
///
/// - `InvalidKeyLength`: sealed bytes have the wrong length
/// - `UnsealFailed`: authentication failed (wrong key, wrong slot, tampering)
pub fn open_seed(key: &StoreKey, aad: &[u8], sealed: &[u8]) -> Result<EphemeralSeed, CryptoError> {
    if sealed.len() != SEALED_SEED_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: SEALED_SEED_SIZE,
            actual: sealed.len(),
        });
    }

    let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new((&key.0).into());

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::UnsealFailed {
                reason: "authentication failed".to_string(),
            })?,
    );

    EphemeralSeed::from_slice(&plaintext)
}
