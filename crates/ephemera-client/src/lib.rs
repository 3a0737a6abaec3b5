//! Ephemeral Device Key Lifecycle
//!
//! Publishes short-lived per-device encryption keys anchored to a Merkle
//! root, and fetches and verifies the keys of the user's other devices.
//!
//! # Architecture
//!
//! Everything that touches the outside world is a collaborator passed in by
//! the caller: the Merkle log ([`MerkleLog`]), the server directory
//! ([`KeyDirectory`]), the identity signer ([`IdentitySigner`]), the device
//! registry ([`DeviceRegistry`]), the local store ([`KeyStore`]) and the
//! environment ([`Environment`]). There is no global state; simulations swap
//! every collaborator for a deterministic one.
//!
//! # Components
//!
//! - [`Publisher`]: mints, stores and posts new generations
//! - [`Fetcher`]: fetches records and sorts them into accepted, expired
//!   (dropped) and forged (hard error)
//! - [`FreshnessOracle`]: bounded-staleness Merkle roots
//! - [`build_and_sign`] / [`EkMetadata`]: canonical metadata codec
//! - [`KeyStore`]: [`MemoryKeyStore`], [`RedbKeyStore`], [`ChaoticKeyStore`]
//!
//! # Trust Decisions
//!
//! ```text
//! record ──► signature ok? ──no──► SignatureInvalid (abort batch)
//!                │yes
//!                ▼
//!          known device? ──no──► UnknownDeviceKey (abort batch)
//!                │yes
//!                ▼
//!          canonical? ──no──► MalformedRecord (abort batch)
//!                │yes
//!                ▼
//!          expired? ──yes──► dropped silently
//!                │no
//!                ▼
//!             accepted
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod deadline;
pub mod directory;
pub mod env;
pub mod error;
pub mod fetcher;
pub mod identity;
pub mod keygen;
pub mod merkle;
pub mod metadata;
pub mod publisher;
pub mod storage;

pub use config::{
    DEFAULT_ALLOCATION_RETRIES, DEFAULT_KEEP_LATEST, DEFAULT_KEY_LIFETIME, DEFAULT_RETENTION_AGE,
    EPHEMERAL_KEY_MERKLE_FRESHNESS, EkConfig, RetentionConfig,
};
pub use deadline::Deadline;
pub use directory::{
    DeviceEkElement, DeviceEksResponse, DeviceId, DirectoryError, KeyDirectory,
    PostDeviceEkRequest,
};
pub use env::{EntropyError, Environment, SystemEnv};
pub use error::EkError;
pub use fetcher::{DeviceEk, Fetcher};
pub use identity::{
    DeviceRegistry, DeviceSigningKey, IdentitySigner, SigningError, StaticDeviceRegistry,
};
pub use keygen::generate_device_seed;
pub use merkle::{FreshnessOracle, HashMeta, MerkleError, MerkleLog, MerkleRoot};
pub use metadata::{EkMetadata, Generation, MAX_METADATA_LEN, SignedEkRecord, build_and_sign};
pub use publisher::Publisher;
pub use storage::{
    ChaoticKeyStore, EntryStatus, EntrySummary, KeyStore, LocalKeyStoreEntry, MemoryKeyStore,
    RedbKeyStore, RetentionPolicy, StorageError,
};
