//! Redb-backed durable key store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Seeds
//! are sealed with XChaCha20-Poly1305 under a store key before they touch
//! disk; metadata and status are stored alongside in CBOR. Seal nonces come
//! from the store's [`Environment`].

use std::{path::Path, sync::Arc};

use ephemera_crypto::{DeviceEphemeralSeed, SEAL_NONCE_SIZE, StoreKey, open_seed, seal_seed};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::{
    EntryStatus, EntrySummary, KeyStore, LocalKeyStoreEntry, RetentionPolicy, StorageError,
    check_next, device_id_len,
};
use crate::{
    directory::DeviceId,
    env::{Environment, SystemEnv},
    metadata::{EkMetadata, Generation},
};

/// Table: entries
/// Key: [device_id len: 2 bytes BE][device_id UTF-8][generation: 8 bytes BE]
/// Value: CBOR-encoded StoredEntry
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Table: max_generation
/// Key: device_id UTF-8 bytes
/// Value: highest generation ever written (survives pruning)
const MAX_GENERATION: TableDefinition<&[u8], u64> = TableDefinition::new("max_generation");

/// On-disk form of an entry. The seed is sealed; the entry key is its AAD.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    sealed_seed: Vec<u8>,
    metadata: EkMetadata,
    status: EntryStatus,
}

/// Durable key store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone, Debug)]
pub struct RedbKeyStore<E = SystemEnv> {
    db: Arc<Database>,
    key: Arc<StoreKey>,
    env: E,
}

impl RedbKeyStore<SystemEnv> {
    /// Open or create a store at `path`, sealing seeds under `key` with
    /// nonces from the OS.
    ///
    /// Opening an existing store with a different key succeeds, but every
    /// `get` of a published entry will fail with `StorageError::Crypto`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>, key: StoreKey) -> Result<Self, StorageError> {
        Self::open_with_env(path, key, SystemEnv::new())
    }
}

impl<E: Environment> RedbKeyStore<E> {
    /// Open or create a store at `path`, drawing seal nonces from `env`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open_with_env(
        path: impl AsRef<Path>,
        key: StoreKey,
        env: E,
    ) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(MAX_GENERATION).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db), key: Arc::new(key), env })
    }

    fn seal(&self, slot: &[u8], seed: &DeviceEphemeralSeed) -> Result<Vec<u8>, StorageError> {
        let mut nonce = [0u8; SEAL_NONCE_SIZE];
        self.env.random_bytes(&mut nonce).map_err(|e| StorageError::Crypto(e.to_string()))?;
        Ok(seal_seed(&self.key, slot, seed.seed(), nonce))
    }

    fn decode_entry(
        &self,
        slot: &[u8],
        generation: Generation,
        stored: &StoredEntry,
    ) -> Result<LocalKeyStoreEntry, StorageError> {
        let seed = open_seed(&self.key, slot, &stored.sealed_seed)?;
        Ok(LocalKeyStoreEntry {
            generation,
            seed: DeviceEphemeralSeed::new(seed),
            metadata: stored.metadata,
            status: stored.status,
        })
    }

    /// All `(generation, entry)` pairs of a device, ascending.
    fn scan_device<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
        device_id: &DeviceId,
    ) -> Result<Vec<(Generation, StoredEntry)>, StorageError> {
        let start_key = encode_entry_key(device_id, Generation::ZERO)?;
        let end_key = encode_entry_key(device_id, Generation::new(u64::MAX))?;

        let results = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut entries = Vec::new();
        for result in results {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let generation = decode_entry_generation(key.value())?;
            entries.push((generation, decode_stored(value.value())?));
        }

        Ok(entries)
    }
}

impl<E: Environment> KeyStore for RedbKeyStore<E> {
    fn put(&self, device_id: &DeviceId, entry: &LocalKeyStoreEntry) -> Result<(), StorageError> {
        let slot = encode_entry_key(device_id, entry.generation)?;
        let stored = StoredEntry {
            sealed_seed: self.seal(&slot, &entry.seed)?,
            metadata: entry.metadata,
            status: entry.status,
        };

        let mut bytes = Vec::with_capacity(256);
        ciborium::into_writer(&stored, &mut bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut max_table =
                txn.open_table(MAX_GENERATION).map_err(|e| StorageError::Io(e.to_string()))?;

            let current = max_table
                .get(device_id.as_str().as_bytes())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map_or(Generation::ZERO, |guard| Generation::new(guard.value()));
            check_next(current, entry.generation)?;

            max_table
                .insert(device_id.as_str().as_bytes(), entry.generation.value())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            let mut entries =
                txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
            entries
                .insert(slot.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn get(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<Option<LocalKeyStoreEntry>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        let slot = encode_entry_key(device_id, generation)?;
        let Some(value) =
            table.get(slot.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?
        else {
            return Ok(None);
        };

        let stored = decode_stored(value.value())?;
        if stored.status != EntryStatus::Published {
            return Ok(None);
        }

        self.decode_entry(&slot, generation, &stored).map(Some)
    }

    fn max_generation(&self, device_id: &DeviceId) -> Result<Generation, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(MAX_GENERATION).map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(table
            .get(device_id.as_str().as_bytes())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map_or(Generation::ZERO, |guard| Generation::new(guard.value())))
    }

    fn mark_published(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<(), StorageError> {
        let slot = encode_entry_key(device_id, generation)?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let existing = table
                .get(slot.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map(|guard| guard.value().to_vec());
            let Some(existing) = existing else {
                return Err(StorageError::NotFound {
                    device_id: device_id.to_string(),
                    generation: generation.value(),
                });
            };

            let mut stored = decode_stored(&existing)?;
            if stored.status == EntryStatus::Published {
                return Ok(());
            }
            stored.status = EntryStatus::Published;

            let mut bytes = Vec::with_capacity(existing.len());
            ciborium::into_writer(&stored, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            table
                .insert(slot.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn generations(&self, device_id: &DeviceId) -> Result<Vec<EntrySummary>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self::scan_device(&table, device_id)?
            .into_iter()
            .map(|(generation, stored)| EntrySummary {
                generation,
                kid: stored.metadata.kid,
                hash_meta: stored.metadata.hash_meta,
                status: stored.status,
            })
            .collect())
    }

    fn prune(
        &self,
        device_id: &DeviceId,
        policy: &RetentionPolicy,
        now_secs: u64,
    ) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        let removed = {
            let mut table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let summaries: Vec<EntrySummary> = Self::scan_device(&table, device_id)?
                .into_iter()
                .map(|(generation, stored)| EntrySummary {
                    generation,
                    kid: stored.metadata.kid,
                    hash_meta: stored.metadata.hash_meta,
                    status: stored.status,
                })
                .collect();

            let prunable = policy.select_prunable(&summaries, now_secs);
            for generation in &prunable {
                let slot = encode_entry_key(device_id, *generation)?;
                table.remove(slot.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            prunable.len()
        };
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(removed)
    }
}

/// Encode `(device_id, generation)` as an entry key.
///
/// Layout: [device_id len: 2 bytes BE][device_id UTF-8][generation: 8 bytes BE]
/// The length prefix keeps one device's range from covering another whose id
/// it prefixes; big-endian generations sort numerically.
///
/// # Errors
///
/// `DeviceIdTooLong` if the id does not fit the length prefix.
fn encode_entry_key(
    device_id: &DeviceId,
    generation: Generation,
) -> Result<Vec<u8>, StorageError> {
    let len = device_id_len(device_id)?;
    let id = device_id.as_str().as_bytes();

    let mut key = Vec::with_capacity(2 + id.len() + 8);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(id);
    key.extend_from_slice(&generation.value().to_be_bytes());
    Ok(key)
}

/// Generation from the trailing 8 bytes of an entry key.
fn decode_entry_generation(key: &[u8]) -> Result<Generation, StorageError> {
    let tail = key
        .len()
        .checked_sub(8)
        .and_then(|start| <[u8; 8]>::try_from(&key[start..]).ok())
        .ok_or_else(|| StorageError::Serialization("entry key too short".to_string()))?;
    Ok(Generation::new(u64::from_be_bytes(tail)))
}

fn decode_stored(bytes: &[u8]) -> Result<StoredEntry, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
