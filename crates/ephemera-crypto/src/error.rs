//! Error types for ephemeral key primitives

use thiserror::Error;

/// Errors from key derivation and seed sealing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key or seed material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Sealed seed failed authentication (wrong store key, wrong slot, or
    /// tampering)
    #[error("seed unsealing failed: {reason}")]
    UnsealFailed {
        /// Reason for the failure
        reason: String,
    },

    /// Hex or other textual key encoding was malformed
    #[error("malformed encoding: {0}")]
    Encoding(String),
}

/// Errors from producing or checking a signed packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Packet string is not valid base64 or not a valid packet structure
    #[error("malformed signed packet: {0}")]
    Malformed(String),

    /// Packet was produced by a format version this build does not understand
    #[error("unsupported packet version {0}")]
    UnsupportedVersion(u8),

    /// Embedded signer key is not a valid Ed25519 point
    #[error("invalid signer key: {0}")]
    InvalidSignerKey(String),

    /// Signature does not verify over the embedded payload
    #[error("signature verification failed")]
    VerificationFailed,

    /// Packet exceeds the maximum accepted size
    #[error("signed packet too large: {size} bytes (max {max})")]
    TooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Maximum accepted size in bytes
        max: usize,
    },
}
