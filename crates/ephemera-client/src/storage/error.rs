//! Storage error types.
//!
//! - `NotFound`: requested generation doesn't exist for the device
//! - `Conflict`: generation is not the next one (allocation race or gap)
//! - `DeviceIdTooLong`: device id does not fit an entry key
//! - `Serialization`: failed to encode/decode an entry
//! - `Crypto`: sealed seed could not be opened or sealed
//! - `Io`: underlying storage system errors

use thiserror::Error;

/// Errors that can occur during key store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Generation not found for this device
    #[error("entry not found: device {device_id}, generation {generation}")]
    NotFound {
        /// Device that was queried
        device_id: String,
        /// Generation that was not found
        generation: u64,
    },

    /// Generation conflict
    ///
    /// Raised when writing a generation that is not exactly one past the
    /// device's current maximum, e.g. when two writers read the same maximum
    /// and the other one committed first.
    #[error("generation conflict: expected {expected}, got {got}")]
    Conflict {
        /// Next generation the store would accept
        expected: u64,
        /// Generation the caller tried to write
        got: u64,
    },

    /// Device id too long to key an entry
    #[error("device id is {len} bytes, at most {max} allowed")]
    DeviceIdTooLong {
        /// Length of the rejected id
        len: usize,
        /// Longest accepted id
        max: usize,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Sealing or unsealing seed material failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns true if retrying the operation may succeed.
    ///
    /// Conflicts resolve by re-reading the current maximum; I/O errors may be
    /// temporary. Corrupt or undecryptable data never fixes itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Io(_))
    }
}

impl From<ephemera_crypto::CryptoError> for StorageError {
    fn from(err: ephemera_crypto::CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_io_are_transient() {
        assert!(StorageError::Conflict { expected: 2, got: 1 }.is_transient());
        assert!(StorageError::Io("disk full".to_string()).is_transient());
    }

    #[test]
    fn corruption_is_not_transient() {
        assert!(!StorageError::Serialization("bad cbor".to_string()).is_transient());
        assert!(!StorageError::Crypto("tag mismatch".to_string()).is_transient());
        assert!(!StorageError::DeviceIdTooLong { len: 70_000, max: 65_535 }.is_transient());
        assert!(
            !StorageError::NotFound { device_id: "d1".to_string(), generation: 3 }.is_transient()
        );
    }

    #[test]
    fn error_display() {
        let err = StorageError::Conflict { expected: 3, got: 2 };
        assert_eq!(err.to_string(), "generation conflict: expected 3, got 2");
    }
}
