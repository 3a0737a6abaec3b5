//! Ephemeral seed material.
//!
//! Seeds are the only secret that is persisted for an ephemeral key. The
//! keypair is recomputed from the seed on demand, so the seed is what the
//! local store seals at rest. Seeds never leave the process unsealed.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    derivation::{DEVICE_EK_ENCRYPTION, DerivedDhKeyPair, derive_dh_keypair},
    error::CryptoError,
};

/// Size of an ephemeral seed in bytes
pub const EPHEMERAL_SEED_SIZE: usize = 32;

/// 32 bytes of secret randomness from which an ephemeral keypair is derived.
///
/// Zeroized on drop. `Debug` never prints the secret bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralSeed([u8; EPHEMERAL_SEED_SIZE]);

impl EphemeralSeed {
    /// Wrap raw seed bytes.
    ///
    /// Callers provide the randomness; this crate never touches an RNG.
    pub fn from_bytes(bytes: [u8; EPHEMERAL_SEED_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a seed from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; EPHEMERAL_SEED_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: EPHEMERAL_SEED_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw seed bytes.
    pub fn as_bytes(&self) -> &[u8; EPHEMERAL_SEED_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EphemeralSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralSeed(<redacted>)")
    }
}

/// Seed scoped to device ephemeral key encryption.
///
/// A distinct type so a device EK seed cannot be passed where another
/// seed-derived secret is expected. Derivation always uses
/// [`DEVICE_EK_ENCRYPTION`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceEphemeralSeed(EphemeralSeed);

impl DeviceEphemeralSeed {
    /// Scope a generic seed to device EK use.
    pub fn new(seed: EphemeralSeed) -> Self {
        Self(seed)
    }

    /// Underlying seed, for sealing into the local store.
    pub fn seed(&self) -> &EphemeralSeed {
        &self.0
    }

    /// Derive the device EK Diffie-Hellman keypair.
    pub fn derive_dh_keypair(&self) -> DerivedDhKeyPair {
        derive_dh_keypair(&self.0, DEVICE_EK_ENCRYPTION)
    }
}

impl fmt::Debug for DeviceEphemeralSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceEphemeralSeed(<redacted>)")
    }
}
