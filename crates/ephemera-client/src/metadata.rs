//! EK metadata codec and signer.
//!
//! Metadata is the record a device publishes for each generation: the public
//! key, the generation number and a reference to the Merkle root current at
//! publish time. Signatures cover its canonical encoding, so encoding must be
//! deterministic and decoding must refuse anything else.
//!
//! # Canonical Form
//!
//! CBOR of [`EkMetadata`] with the fixed field order
//! `kid, generation, hash_meta{hash, seqno, ctime}`. A payload decodes only if
//! re-encoding the decoded value reproduces it byte for byte.

use std::{fmt, time::Duration};

use ephemera_crypto::{Kid, VerifyingKey, verify_and_extract};
use serde::{Deserialize, Serialize};

use crate::{
    error::EkError,
    identity::IdentitySigner,
    merkle::{HashMeta, MerkleRoot},
};

/// Largest metadata payload accepted for decoding.
pub const MAX_METADATA_LEN: usize = 4096;

/// Ephemeral key epoch of a device. Starts at 1 for the first publish.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// No generation published yet.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw generation number.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw generation number.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Generation following this one.
    ///
    /// Saturates at `u64::MAX`; the store rejects the repeated value.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed statement binding a device EK to a generation and a Merkle root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EkMetadata {
    /// Public half of the derived DH keypair
    pub kid: Kid,
    /// Generation this key belongs to
    pub generation: Generation,
    /// Merkle root current when the key was published
    pub hash_meta: HashMeta,
}

impl EkMetadata {
    /// Canonical encoding covered by the signature.
    ///
    /// # Errors
    ///
    /// `Encoding` if CBOR serialization fails, which only happens on a
    /// writer failure and is a programming error.
    pub fn encode_canonical(&self) -> Result<Vec<u8>, EkError> {
        let mut bytes = Vec::with_capacity(128);
        ciborium::into_writer(self, &mut bytes).map_err(|e| EkError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode a canonical payload.
    ///
    /// # Errors
    ///
    /// `MalformedRecord` if the payload is oversized, is not metadata CBOR, or
    /// is metadata in a non-canonical encoding.
    pub fn decode_canonical(payload: &[u8]) -> Result<Self, EkError> {
        if payload.len() > MAX_METADATA_LEN {
            return Err(EkError::MalformedRecord(format!(
                "payload of {} bytes exceeds {MAX_METADATA_LEN}",
                payload.len()
            )));
        }

        let metadata: Self = ciborium::from_reader(payload)
            .map_err(|e| EkError::MalformedRecord(e.to_string()))?;

        if metadata.encode_canonical()? != payload {
            return Err(EkError::MalformedRecord("non-canonical metadata encoding".to_string()));
        }

        Ok(metadata)
    }

    /// Whether this record is past its freshness window as seen from
    /// `verifier_root`.
    ///
    /// Records bound to a root newer than the verifier's are never expired.
    pub fn is_expired_at(&self, verifier_root: &MerkleRoot, key_lifetime: Duration) -> bool {
        verifier_root.age_of(&self.hash_meta) > key_lifetime
    }
}

/// Wire form of signed metadata.
///
/// `sig` is the self-describing signed packet; it embeds both the signer key
/// and the canonical metadata payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEkRecord {
    sig: String,
}

impl SignedEkRecord {
    /// Wrap a signed packet received from the directory.
    pub fn from_wire(sig: impl Into<String>) -> Self {
        Self { sig: sig.into() }
    }

    /// Signed packet as posted to the directory.
    pub fn as_wire(&self) -> &str {
        &self.sig
    }

    /// Consume into the wire string.
    pub fn into_wire(self) -> String {
        self.sig
    }

    /// Verify the signature and extract `(signer, payload)`.
    ///
    /// The payload is NOT yet decoded; callers bind the signer to a device
    /// before trusting its contents.
    ///
    /// # Errors
    ///
    /// `SignatureInvalid` on a malformed packet or bad signature.
    pub fn verify(&self) -> Result<(VerifyingKey, Vec<u8>), EkError> {
        Ok(verify_and_extract(&self.sig)?)
    }
}

/// Build metadata for a new generation and sign its canonical encoding.
///
/// # Errors
///
/// - `SigningUnavailable`: the signer is locked, missing or revoked
/// - `Encoding`: serialization failed (programming error)
pub fn build_and_sign<S: IdentitySigner + ?Sized>(
    kid: Kid,
    generation: Generation,
    root: &MerkleRoot,
    signer: &S,
) -> Result<(EkMetadata, SignedEkRecord), EkError> {
    let metadata = EkMetadata { kid, generation, hash_meta: root.hash_meta() };
    let payload = metadata.encode_canonical()?;

    let sig = signer
        .sign_to_string(&payload)
        .map_err(|e| EkError::SigningUnavailable(e.to_string()))?;

    Ok((metadata, SignedEkRecord { sig }))
}
