//! Error types for ephemeral key publication and verification.
//!
//! Two classes matter to callers:
//!
//! - Recoverable conditions (stale root, transport failures, deadlines,
//!   allocation races) that a higher layer may retry with backoff.
//! - Trust violations on fetched records (bad signature, unknown signer,
//!   malformed signed payload). These abort the whole fetch; they are never
//!   skipped silently because they may indicate forgery.
//!
//! Expiry is not an error. Expired records are filtered out by the fetcher.

use std::time::Duration;

use ephemera_crypto::SignatureError;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors from the ephemeral key lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EkError {
    /// Secure randomness could not be obtained
    #[error("entropy unavailable: {0}")]
    EntropyUnavailable(String),

    /// No Merkle root within the requested staleness bound
    #[error("no merkle root fresher than {max_staleness:?}: {reason}")]
    StaleRootUnavailable {
        /// Requested staleness bound
        max_staleness: Duration,
        /// What the log collaborator reported
        reason: String,
    },

    /// Long-term signing key is missing, locked, or revoked
    #[error("signing key unavailable: {0}")]
    SigningUnavailable(String),

    /// A fetched record's signature did not verify
    #[error("invalid signature on device key record: {0}")]
    SignatureInvalid(#[from] SignatureError),

    /// A fetched record was signed by a key that is not one of our devices
    #[error("device key record signed by unknown key {signer}")]
    UnknownDeviceKey {
        /// Hex-encoded signer public key
        signer: String,
    },

    /// A validly signed record carried a payload that is not canonical
    /// metadata
    #[error("malformed device key record: {0}")]
    MalformedRecord(String),

    /// Metadata could not be encoded (programming error)
    #[error("metadata encoding failed: {0}")]
    Encoding(String),

    /// Local key store failure
    #[error("key store error: {0}")]
    Storage(#[from] StorageError),

    /// Server directory request failed
    #[error("directory request failed: {0}")]
    Directory(String),

    /// Generation allocation kept losing races with concurrent writers
    #[error("generation allocation failed after {attempts} attempts")]
    GenerationContention {
        /// Number of allocation attempts made
        attempts: u32,
    },

    /// The caller's deadline passed before the operation completed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl EkError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Retrying is the caller's decision. A publish that failed with a
    /// transient error after reaching the directory may still have been
    /// accepted; see `Publisher::reconcile`.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StaleRootUnavailable { .. }
            | Self::Directory(_)
            | Self::GenerationContention { .. }
            | Self::DeadlineExceeded => true,
            Self::Storage(err) => err.is_transient(),
            Self::EntropyUnavailable(_)
            | Self::SigningUnavailable(_)
            | Self::SignatureInvalid(_)
            | Self::UnknownDeviceKey { .. }
            | Self::MalformedRecord(_)
            | Self::Encoding(_) => false,
        }
    }

    /// Returns true if this error means a fetched record failed verification.
    pub fn is_trust_violation(&self) -> bool {
        matches!(
            self,
            Self::SignatureInvalid(_) | Self::UnknownDeviceKey { .. } | Self::MalformedRecord(_)
        )
    }
}
