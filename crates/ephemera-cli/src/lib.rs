//! Operator commands for the local device ephemeral key store.
//!
//! The binary in `main.rs` parses arguments and installs logging; the
//! commands here do the work so they can be driven from tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{fmt, path::Path, time::Duration};

use ephemera_client::{
    DeviceId, EkConfig, EntryStatus, EntrySummary, KeyStore, RedbKeyStore, RetentionPolicy,
    StorageError,
};
use ephemera_crypto::{CryptoError, DeviceEphemeralSeed, EphemeralSeed, Kid, StoreKey};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Command errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// A seed or store key argument could not be parsed
    #[error("invalid {what}: {reason}")]
    InvalidArgument {
        /// Argument name
        what: &'static str,
        /// Parse failure
        reason: String,
    },

    /// The local store failed
    #[error("key store error: {0}")]
    Storage(#[from] StorageError),
}

impl From<CryptoError> for CliError {
    fn from(err: CryptoError) -> Self {
        Self::InvalidArgument { what: "store key", reason: err.to_string() }
    }
}

/// KID of the device EK derived from a hex-encoded 32-byte seed.
pub fn derive_kid(seed_hex: &str) -> Result<Kid, CliError> {
    let bytes = Zeroizing::new(hex::decode(seed_hex.trim()).map_err(|e| {
        CliError::InvalidArgument { what: "seed", reason: e.to_string() }
    })?);
    let seed = EphemeralSeed::from_slice(&bytes)
        .map_err(|e| CliError::InvalidArgument { what: "seed", reason: e.to_string() })?;

    Ok(DeviceEphemeralSeed::new(seed).derive_dh_keypair().kid())
}

/// Open the durable store at `db` with a hex-encoded store key.
pub fn open_store(db: &Path, store_key_hex: &str) -> Result<RedbKeyStore, CliError> {
    let key = StoreKey::from_hex(store_key_hex)?;
    debug!(db = %db.display(), "opening key store");
    Ok(RedbKeyStore::open(db, key)?)
}

/// Every local generation of `device`, oldest first.
pub fn list_entries<S: KeyStore>(
    store: &S,
    device: &DeviceId,
) -> Result<Vec<EntrySummary>, CliError> {
    Ok(store.generations(device)?)
}

/// Retention policy from command-line overrides.
///
/// Unset fields keep the configured defaults. The age bound is never below
/// the key lifetime.
pub fn retention_policy(
    config: &EkConfig,
    keep_latest: Option<usize>,
    max_age_days: Option<u64>,
) -> RetentionPolicy {
    let mut config = config.clone();
    if let Some(keep_latest) = keep_latest {
        config.retention.keep_latest = keep_latest;
    }
    if let Some(days) = max_age_days {
        config.retention.max_age = Duration::from_secs(days.saturating_mul(SECS_PER_DAY));
    }
    config.effective_retention()
}

/// Apply `policy` to `device` at `now_secs`. Returns the number of removed
/// entries.
pub fn prune_entries<S: KeyStore>(
    store: &S,
    device: &DeviceId,
    policy: &RetentionPolicy,
    now_secs: u64,
) -> Result<usize, CliError> {
    let removed = store.prune(device, policy, now_secs)?;
    info!(
        device = %device,
        removed,
        keep_latest = policy.keep_latest(),
        max_age_secs = policy.max_age().as_secs(),
        "pruned key store"
    );
    Ok(removed)
}

/// One line of `list` output.
pub struct EntryLine<'a>(pub &'a EntrySummary);

impl fmt::Display for EntryLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;
        let status = match summary.status {
            EntryStatus::Pending => "pending",
            EntryStatus::Published => "published",
        };
        write!(
            f,
            "{:>6}  {:<9}  {}  seqno={} ctime={}",
            summary.generation.value(),
            status,
            summary.kid,
            summary.hash_meta.seqno,
            summary.hash_meta.ctime,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_rejects_bad_seeds() {
        assert!(matches!(
            derive_kid("not hex"),
            Err(CliError::InvalidArgument { what: "seed", .. })
        ));
        assert!(matches!(
            derive_kid("abcd"),
            Err(CliError::InvalidArgument { what: "seed", .. })
        ));
    }

    #[test]
    fn derive_ignores_surrounding_whitespace() {
        let seed = "11".repeat(32);
        assert_eq!(derive_kid(&seed).unwrap(), derive_kid(&format!(" {seed}\n")).unwrap());
    }

    #[test]
    fn overrides_are_floored_at_key_lifetime() {
        let config = EkConfig::default();

        let policy = retention_policy(&config, Some(1), Some(1));
        assert_eq!(policy.keep_latest(), 1);
        assert_eq!(policy.max_age(), config.key_lifetime);

        let policy = retention_policy(&config, None, Some(60));
        assert_eq!(policy.keep_latest(), config.retention.keep_latest);
        assert_eq!(policy.max_age(), Duration::from_secs(60 * SECS_PER_DAY));
    }
}
