//! Ephemera Cryptographic Primitives
//!
//! Cryptographic building blocks for ephemeral device keys. Pure functions
//! with deterministic outputs. Callers provide random bytes (seeds, nonces)
//! for deterministic testing.
//!
//! # Key Lifecycle
//!
//! Each ephemeral key generation starts from 32 bytes of fresh randomness.
//! The seed is the only secret that is kept; the Diffie-Hellman keypair is
//! re-derived from it whenever needed. Only the public half (the KID) is
//! published, inside metadata signed by the device's long-term identity key.
//!
//! ```text
//! Random Seed (32 bytes)
//!        │
//!        ├──► Seal (XChaCha20-Poly1305) → Local Store
//!        │
//!        ▼
//! HKDF(seed, domain tag) → X25519 Secret
//!        │
//!        ▼
//! X25519 Public Key = KID → Metadata → Ed25519 Signed Packet
//! ```
//!
//! # Security
//!
//! Domain Separation:
//! - Every derivation mixes in a [`DomainTag`]
//! - The same seed under a different tag yields an unrelated key
//!
//! Secret Hygiene:
//! - Seeds, derived secrets and store keys are zeroized on drop
//! - `Debug` output never contains secret bytes
//!
//! Authenticity:
//! - Signed packets embed the signer key; signatures cover a fixed context
//!   prefix plus the payload
//! - Sealed seeds are bound to their storage slot via associated data

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod derivation;
pub mod error;
pub mod sealing;
pub mod seed;
pub mod signing;

pub use derivation::{
    DEVICE_EK_ENCRYPTION, DerivedDhKeyPair, DomainTag, KID_SIZE, Kid, derive_dh_keypair,
    derive_secret,
};
pub use ed25519_dalek::{SigningKey, VerifyingKey};
pub use error::{CryptoError, SignatureError};
pub use sealing::{SEAL_NONCE_SIZE, SEALED_SEED_SIZE, StoreKey, open_seed, seal_seed};
pub use seed::{DeviceEphemeralSeed, EPHEMERAL_SEED_SIZE, EphemeralSeed};
pub use signing::{
    MAX_PACKET_LEN, PACKET_VERSION, SIGNATURE_CONTEXT, sign_to_string, verify_and_extract,
};
