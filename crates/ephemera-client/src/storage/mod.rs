//! Local key store.
//!
//! Persists one seed per `(device, generation)` together with the signed
//! metadata it was published under. The trait is synchronous; every
//! operation is a single transaction, so an abandoned publish can never leave
//! half of a write behind.
//!
//! # Invariants
//!
//! - Generations are append-only per device: `put` only accepts
//!   `max_generation + 1`
//! - `max_generation` never decreases, even after pruning
//! - `get` only returns entries whose publication completed
//! - Device ids are at most `u16::MAX` bytes; longer ids are rejected, never
//!   truncated

mod chaotic;
mod error;
mod memory;
mod redb;

use std::time::Duration;

use ephemera_crypto::{DeviceEphemeralSeed, Kid};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbKeyStore;
pub use chaotic::ChaoticKeyStore;
pub use error::StorageError;
pub use memory::MemoryKeyStore;

use crate::{
    config::{DEFAULT_KEEP_LATEST, DEFAULT_KEY_LIFETIME, DEFAULT_RETENTION_AGE},
    directory::DeviceId,
    merkle::HashMeta,
    metadata::{EkMetadata, Generation},
};

/// Publication state of a stored generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Written before the directory accepted the record. Reserves the
    /// generation but is invisible to `get`.
    Pending,
    /// The directory accepted the record.
    Published,
}

/// One stored generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalKeyStoreEntry {
    /// Generation number
    pub generation: Generation,
    /// Secret seed; the DH keypair is re-derived from it on demand
    pub seed: DeviceEphemeralSeed,
    /// Metadata the key was (or is being) published under
    pub metadata: EkMetadata,
    /// Publication state
    pub status: EntryStatus,
}

/// Secret-free view of a stored generation, for listing and pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySummary {
    /// Generation number
    pub generation: Generation,
    /// Published public key
    pub kid: Kid,
    /// Root the key was bound to
    pub hash_meta: HashMeta,
    /// Publication state
    pub status: EntryStatus,
}

impl From<&LocalKeyStoreEntry> for EntrySummary {
    fn from(entry: &LocalKeyStoreEntry) -> Self {
        Self {
            generation: entry.generation,
            kid: entry.metadata.kid,
            hash_meta: entry.metadata.hash_meta,
            status: entry.status,
        }
    }
}

/// How long superseded seeds are kept.
///
/// A published entry is removed only if it is not among the `keep_latest`
/// newest published generations AND its bound root is older than `max_age`.
/// Pending entries older than `max_age` are removed regardless.
///
/// `max_age` is never below the key lifetime the policy was built for: peers
/// accept a key for that long, so its seed must outlive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_latest: usize,
    max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_LATEST, DEFAULT_RETENTION_AGE, DEFAULT_KEY_LIFETIME)
    }
}

impl RetentionPolicy {
    /// Policy keeping `keep_latest` published generations, with `max_age`
    /// raised to at least `key_lifetime`.
    pub fn new(keep_latest: usize, max_age: Duration, key_lifetime: Duration) -> Self {
        Self { keep_latest, max_age: max_age.max(key_lifetime) }
    }

    /// Newest published generations that are always kept.
    pub fn keep_latest(&self) -> usize {
        self.keep_latest
    }

    /// Minimum age before an entry may be removed.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Raise `max_age` to at least `floor`. Never lowers it.
    #[must_use]
    pub fn bounded_by(mut self, floor: Duration) -> Self {
        self.max_age = self.max_age.max(floor);
        self
    }

    /// Generations in `entries` that this policy removes at `now_secs`.
    pub fn select_prunable(&self, entries: &[EntrySummary], now_secs: u64) -> Vec<Generation> {
        let mut published: Vec<Generation> = entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Published)
            .map(|entry| entry.generation)
            .collect();
        published.sort_unstable_by(|a, b| b.cmp(a));
        let kept = &published[..published.len().min(self.keep_latest)];

        entries
            .iter()
            .filter(|entry| {
                let age = Duration::from_secs(now_secs.saturating_sub(entry.hash_meta.ctime));
                age > self.max_age
                    && (entry.status == EntryStatus::Pending || !kept.contains(&entry.generation))
            })
            .map(|entry| entry.generation)
            .collect()
    }
}

/// Persistent per-device store of ephemeral seeds.
///
/// Must be Clone (shared by publisher and tools), Send + Sync, and
/// synchronous. Clones share the same underlying storage.
pub trait KeyStore: Clone + Send + Sync + 'static {
    /// Append a generation for `device_id`.
    ///
    /// # Invariants
    ///
    /// - Pre: `entry.generation` must equal `max_generation(device_id) + 1`
    /// - Post: entry is durable and `max_generation` equals its generation
    ///
    /// # Errors
    ///
    /// `Conflict` if another writer already took the generation or it would
    /// leave a gap.
    fn put(&self, device_id: &DeviceId, entry: &LocalKeyStoreEntry) -> Result<(), StorageError>;

    /// Published entry for `(device_id, generation)`.
    ///
    /// Returns `None` for unknown, pruned, or still-pending generations.
    fn get(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<Option<LocalKeyStoreEntry>, StorageError>;

    /// Highest generation ever written for `device_id`, pending included.
    ///
    /// `Generation::ZERO` if the device never published.
    fn max_generation(&self, device_id: &DeviceId) -> Result<Generation, StorageError>;

    /// Mark a pending generation as accepted by the directory.
    ///
    /// Idempotent for already-published entries.
    ///
    /// # Errors
    ///
    /// `NotFound` if the generation is not stored.
    fn mark_published(&self, device_id: &DeviceId, generation: Generation)
    -> Result<(), StorageError>;

    /// Summaries of every stored generation, ascending.
    fn generations(&self, device_id: &DeviceId) -> Result<Vec<EntrySummary>, StorageError>;

    /// Remove entries selected by `policy` at wall-clock time `now_secs`.
    ///
    /// Returns the number of entries removed. Never lowers `max_generation`.
    fn prune(
        &self,
        device_id: &DeviceId,
        policy: &RetentionPolicy,
        now_secs: u64,
    ) -> Result<usize, StorageError>;
}

/// Byte length of `device_id`, which every store keys entries by.
///
/// # Errors
///
/// `DeviceIdTooLong` past `u16::MAX` bytes.
pub(crate) fn device_id_len(device_id: &DeviceId) -> Result<u16, StorageError> {
    let len = device_id.as_str().len();
    u16::try_from(len)
        .map_err(|_| StorageError::DeviceIdTooLong { len, max: usize::from(u16::MAX) })
}

/// Check an append against the current maximum.
pub(crate) fn check_next(current: Generation, got: Generation) -> Result<(), StorageError> {
    let expected = current.next();
    if got == expected && got > current {
        Ok(())
    } else {
        Err(StorageError::Conflict { expected: expected.value(), got: got.value() })
    }
}


#[cfg(test)]
mod tests {
    use super::{
        test_support::{DAY, entry},
        *,
    };

    fn summaries(entries: &[LocalKeyStoreEntry]) -> Vec<EntrySummary> {
        entries.iter().map(EntrySummary::from).collect()
    }

    fn policy(keep_latest: usize, max_age_days: u64) -> RetentionPolicy {
        RetentionPolicy::new(
            keep_latest,
            Duration::from_secs(max_age_days * DAY),
            DEFAULT_KEY_LIFETIME,
        )
    }

    #[test]
    fn keeps_latest_published_even_when_old() {
        let entries = summaries(&[
            entry(1, 0, EntryStatus::Published),
            entry(2, 0, EntryStatus::Published),
            entry(3, 0, EntryStatus::Published),
        ]);

        assert_eq!(policy(2, 10).select_prunable(&entries, 100 * DAY), vec![Generation::new(1)]);
    }

    #[test]
    fn young_entries_are_kept() {
        let entries = summaries(&[
            entry(1, 10 * DAY, EntryStatus::Published),
            entry(2, 10 * DAY, EntryStatus::Pending),
        ]);

        assert!(policy(0, 10).select_prunable(&entries, 15 * DAY).is_empty());
    }

    #[test]
    fn short_max_age_never_prunes_inside_key_lifetime() {
        let entries = summaries(&[
            entry(1, 1_000, EntryStatus::Published),
            entry(2, 1_000, EntryStatus::Published),
        ]);
        let policy = RetentionPolicy::new(0, Duration::from_secs(60), DEFAULT_KEY_LIFETIME);

        assert_eq!(policy.max_age(), DEFAULT_KEY_LIFETIME);
        assert!(policy.select_prunable(&entries, 1_120).is_empty());
        assert!(policy.select_prunable(&entries, 1_000 + 7 * DAY).is_empty());
        assert_eq!(policy.select_prunable(&entries, 1_001 + 7 * DAY).len(), 2);
    }

    #[test]
    fn short_max_age_store_keeps_recent_seeds() {
        let store = MemoryKeyStore::new();
        let device = DeviceId::new("laptop");
        store.put(&device, &entry(1, 1_000, EntryStatus::Published)).unwrap();
        store.put(&device, &entry(2, 1_000, EntryStatus::Published)).unwrap();

        let policy = RetentionPolicy::new(0, Duration::from_secs(60), DEFAULT_KEY_LIFETIME);

        assert_eq!(store.prune(&device, &policy, 1_120).unwrap(), 0);
        assert!(store.get(&device, Generation::new(1)).unwrap().is_some());
        assert!(store.get(&device, Generation::new(2)).unwrap().is_some());
    }

    #[test]
    fn old_pending_entries_do_not_count_toward_keep_latest() {
        let entries = summaries(&[
            entry(1, 0, EntryStatus::Published),
            entry(2, 0, EntryStatus::Pending),
        ]);

        assert_eq!(policy(5, 10).select_prunable(&entries, 100 * DAY), vec![Generation::new(2)]);
    }

    #[test]
    fn bounded_by_only_raises() {
        let policy = policy(1, 10);

        let raised = policy.clone().bounded_by(Duration::from_secs(20 * DAY));
        assert_eq!(raised.max_age().as_secs(), 20 * DAY);
        assert_eq!(policy.bounded_by(Duration::from_secs(60)).max_age().as_secs(), 10 * DAY);
    }

    #[test]
    fn check_next_requires_successor() {
        assert!(check_next(Generation::ZERO, Generation::new(1)).is_ok());
        assert!(check_next(Generation::new(3), Generation::new(3)).is_err());
        assert!(check_next(Generation::new(u64::MAX), Generation::new(u64::MAX)).is_err());
    }
}
