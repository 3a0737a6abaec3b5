use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{
    EntryStatus, EntrySummary, KeyStore, LocalKeyStoreEntry, RetentionPolicy, StorageError,
    check_next, device_id_len,
};
use crate::{directory::DeviceId, metadata::Generation};

/// In-memory key store for testing and simulation.
///
/// All state sits behind one `Arc<Mutex<>>`, so clones share it and every
/// operation is atomic. Nothing survives the process.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<MemoryKeyStoreInner>>,
}

#[derive(Default)]
struct MemoryKeyStoreInner {
    /// Entries per device, ordered by generation
    entries: HashMap<DeviceId, BTreeMap<Generation, LocalKeyStoreEntry>>,

    /// Highest generation ever written per device (survives pruning)
    max_generations: HashMap<DeviceId, Generation>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored entries across all devices.
    pub fn entry_count(&self) -> usize {
        self.lock().entries.values().map(BTreeMap::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryKeyStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyStore for MemoryKeyStore {
    fn put(&self, device_id: &DeviceId, entry: &LocalKeyStoreEntry) -> Result<(), StorageError> {
        device_id_len(device_id)?;
        let mut inner = self.lock();

        let current = inner.max_generations.get(device_id).copied().unwrap_or_default();
        check_next(current, entry.generation)?;

        inner
            .entries
            .entry(device_id.clone())
            .or_default()
            .insert(entry.generation, entry.clone());
        inner.max_generations.insert(device_id.clone(), entry.generation);

        Ok(())
    }

    fn get(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<Option<LocalKeyStoreEntry>, StorageError> {
        let inner = self.lock();

        Ok(inner
            .entries
            .get(device_id)
            .and_then(|entries| entries.get(&generation))
            .filter(|entry| entry.status == EntryStatus::Published)
            .cloned())
    }

    fn max_generation(&self, device_id: &DeviceId) -> Result<Generation, StorageError> {
        Ok(self.lock().max_generations.get(device_id).copied().unwrap_or_default())
    }

    fn mark_published(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();

        let entry = inner
            .entries
            .get_mut(device_id)
            .and_then(|entries| entries.get_mut(&generation))
            .ok_or_else(|| StorageError::NotFound {
                device_id: device_id.to_string(),
                generation: generation.value(),
            })?;
        entry.status = EntryStatus::Published;

        Ok(())
    }

    fn generations(&self, device_id: &DeviceId) -> Result<Vec<EntrySummary>, StorageError> {
        let inner = self.lock();

        Ok(inner
            .entries
            .get(device_id)
            .map(|entries| entries.values().map(EntrySummary::from).collect())
            .unwrap_or_default())
    }

    fn prune(
        &self,
        device_id: &DeviceId,
        policy: &RetentionPolicy,
        now_secs: u64,
    ) -> Result<usize, StorageError> {
        let mut inner = self.lock();

        let Some(entries) = inner.entries.get_mut(device_id) else {
            return Ok(0);
        };

        let summaries: Vec<EntrySummary> = entries.values().map(EntrySummary::from).collect();
        let prunable = policy.select_prunable(&summaries, now_secs);
        for generation in &prunable {
            entries.remove(generation);
        }

        Ok(prunable.len())
    }
}
