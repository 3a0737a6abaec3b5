//! Diffie-Hellman key derivation from ephemeral seeds using HKDF

use std::fmt;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{error::CryptoError, seed::EphemeralSeed};

/// Domain-separation tag mixed into every derivation.
///
/// The same seed derived under two different tags yields unrelated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainTag(&'static [u8]);

impl DomainTag {
    /// Create a tag from a fixed label.
    pub const fn new(label: &'static [u8]) -> Self {
        Self(label)
    }

    /// Label bytes used as the HKDF info parameter.
    pub fn as_bytes(&self) -> &'static [u8] {
        self.0
    }
}

/// Tag for device ephemeral key encryption keypairs
pub const DEVICE_EK_ENCRYPTION: DomainTag = DomainTag::new(b"device-ek-encryption");

/// Size of a key identifier in bytes
pub const KID_SIZE: usize = 32;

/// Key identifier: the public half of a derived DH keypair.
///
/// This is the only part of a derived keypair that is ever serialized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Kid([u8; KID_SIZE]);

impl Kid {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; KID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded KID.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let array: [u8; KID_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KID_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KID_SIZE] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kid({})", self.to_hex())
    }
}

/// X25519 keypair derived from `(seed, tag)`.
///
/// The secret half zeroizes itself on drop.
pub struct DerivedDhKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DerivedDhKeyPair {
    /// Key identifier (public key).
    pub fn kid(&self) -> Kid {
        Kid(self.public.to_bytes())
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Secret half.
    pub fn secret_key(&self) -> &StaticSecret {
        &self.secret
    }
}

impl PartialEq for DerivedDhKeyPair {
    fn eq(&self, other: &Self) -> bool {
        let ours = Zeroizing::new(self.secret.to_bytes());
        let theirs = Zeroizing::new(other.secret.to_bytes());
        self.public == other.public && *ours == *theirs
    }
}

impl Eq for DerivedDhKeyPair {}

impl fmt::Debug for DerivedDhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedDhKeyPair").field("kid", &self.kid()).finish_non_exhaustive()
    }
}

/// Derive a 32-byte secret from a seed under a domain tag.
///
/// HKDF-SHA256 with the seed as input key material, no salt, and the tag as
/// the info parameter.
///
/// # Security
///
/// - Deterministic: same inputs always produce same output
/// - Different tags produce unrelated outputs (domain separation)
pub fn derive_secret(seed: &EphemeralSeed, reason: DomainTag) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, seed.as_bytes());

    let mut okm = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(reason.as_bytes(), &mut okm[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    okm
}

/// Derive an X25519 keypair from a seed under a domain tag.
///
/// Pure function of its inputs.
pub fn derive_dh_keypair(seed: &EphemeralSeed, reason: DomainTag) -> DerivedDhKeyPair {
    let okm = derive_secret(seed, reason);
    let secret = StaticSecret::from(*okm);
    let public = PublicKey::from(&secret);
    DerivedDhKeyPair { secret, public }
}
