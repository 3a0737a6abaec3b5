//! Generation allocation under concurrency.
//!
//! # Properties
//!
//! - One publisher, N concurrent publishes for a device: generations are
//!   exactly 1..=N
//! - Several publishers sharing one store (separate processes over one
//!   database): every successful publish gets a distinct generation and the
//!   stored generations have no gaps
//! - A lost allocation race is retried; endless races end in
//!   `GenerationContention`

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use ephemera_client::{
    Deadline, DeviceId, EkError, EkMetadata, EntryStatus, EntrySummary, Generation, HashMeta,
    KeyStore, LocalKeyStoreEntry, MemoryKeyStore, RetentionPolicy, StorageError,
};
use ephemera_crypto::{DeviceEphemeralSeed, EphemeralSeed};
use ephemera_harness::SimWorld;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread().worker_threads(4).enable_all().build().unwrap()
}

#[test]
fn prop_single_publisher_allocates_contiguously() {
    proptest!(ProptestConfig::with_cases(24), |(seed in any::<u64>(), publishes in 2usize..12)| {
        let world = Arc::new(SimWorld::new(seed, 1));
        let publisher = Arc::new(world.publisher());

        let generations = runtime().block_on(async {
            let tasks: Vec<_> = (0..publishes)
                .map(|_| {
                    let world = Arc::clone(&world);
                    let publisher = Arc::clone(&publisher);
                    tokio::spawn(async move {
                        let device = world.device(0);
                        publisher.publish(&device.id, &device.signer, Deadline::none()).await
                    })
                })
                .collect();

            let mut generations = Vec::new();
            for task in tasks {
                generations.push(task.await.unwrap().unwrap().generation.value());
            }
            generations
        });

        let unique: BTreeSet<u64> = generations.iter().copied().collect();
        prop_assert_eq!(unique.len(), publishes);
        prop_assert_eq!(unique, (1..=publishes as u64).collect::<BTreeSet<_>>());
        prop_assert_eq!(world.directory.record_count(), publishes);
    });
}

#[test]
fn prop_publishers_sharing_a_store_never_reuse_generations() {
    proptest!(ProptestConfig::with_cases(16), |(
        seed in any::<u64>(),
        publishers in 2usize..5,
        per_publisher in 1usize..6,
    )| {
        let world = Arc::new(SimWorld::new(seed, 1));
        let store = MemoryKeyStore::new();

        let results = runtime().block_on(async {
            let mut tasks = Vec::new();
            for _ in 0..publishers {
                let publisher = Arc::new(world.publisher_with_store(store.clone()));
                for _ in 0..per_publisher {
                    let world = Arc::clone(&world);
                    let publisher = Arc::clone(&publisher);
                    tasks.push(tokio::spawn(async move {
                        let device = world.device(0);
                        publisher.publish(&device.id, &device.signer, Deadline::none()).await
                    }));
                }
            }

            let mut results = Vec::new();
            for task in tasks {
                results.push(task.await.unwrap());
            }
            results
        });

        let mut successful = BTreeSet::new();
        for result in results {
            match result {
                Ok(metadata) => {
                    prop_assert!(successful.insert(metadata.generation.value()));
                },
                Err(EkError::GenerationContention { .. }) => {},
                Err(other) => {
                    prop_assert!(false, "unexpected error: {}", other);
                },
            }
        }

        let device = &world.device(0).id;
        let stored: Vec<u64> = store
            .generations(device)
            .unwrap()
            .iter()
            .map(|summary| summary.generation.value())
            .collect();
        let max = store.max_generation(device).unwrap().value();
        prop_assert_eq!(stored, (1..=max).collect::<Vec<_>>());
        prop_assert_eq!(max as usize, successful.len());
    });
}

/// Store where another writer takes the next generation right after each of
/// the first `races` reads of the maximum.
#[derive(Clone)]
struct RacingStore {
    inner: MemoryKeyStore,
    races: Arc<AtomicUsize>,
    rival: Arc<LocalKeyStoreEntry>,
}

impl RacingStore {
    fn new(races: usize, rival: LocalKeyStoreEntry) -> Self {
        Self {
            inner: MemoryKeyStore::new(),
            races: Arc::new(AtomicUsize::new(races)),
            rival: Arc::new(rival),
        }
    }
}

impl KeyStore for RacingStore {
    fn put(&self, device_id: &DeviceId, entry: &LocalKeyStoreEntry) -> Result<(), StorageError> {
        self.inner.put(device_id, entry)
    }

    fn get(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<Option<LocalKeyStoreEntry>, StorageError> {
        self.inner.get(device_id, generation)
    }

    fn max_generation(&self, device_id: &DeviceId) -> Result<Generation, StorageError> {
        let max = self.inner.max_generation(device_id)?;
        let raced = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if raced {
            let mut rival = (*self.rival).clone();
            rival.generation = max.next();
            rival.metadata.generation = max.next();
            self.inner.put(device_id, &rival)?;
        }
        Ok(max)
    }

    fn mark_published(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<(), StorageError> {
        self.inner.mark_published(device_id, generation)
    }

    fn generations(&self, device_id: &DeviceId) -> Result<Vec<EntrySummary>, StorageError> {
        self.inner.generations(device_id)
    }

    fn prune(
        &self,
        device_id: &DeviceId,
        policy: &RetentionPolicy,
        now_secs: u64,
    ) -> Result<usize, StorageError> {
        self.inner.prune(device_id, policy, now_secs)
    }
}

fn rival_entry() -> LocalKeyStoreEntry {
    let seed = DeviceEphemeralSeed::new(EphemeralSeed::from_bytes([0x99; 32]));
    let kid = seed.derive_dh_keypair().kid();
    LocalKeyStoreEntry {
        generation: Generation::ZERO,
        seed,
        metadata: EkMetadata {
            kid,
            generation: Generation::ZERO,
            hash_meta: HashMeta { hash: [0; 32], seqno: 1, ctime: 0 },
        },
        status: EntryStatus::Pending,
    }
}

#[tokio::test]
async fn lost_race_is_retried() {
    let world = SimWorld::new(20, 1);
    let device = world.device(0);
    let publisher = world.publisher_with_store(RacingStore::new(1, rival_entry()));

    let metadata = publisher.publish(&device.id, &device.signer, Deadline::none()).await.unwrap();

    // The rival took generation 1; the retry landed on 2
    assert_eq!(metadata.generation, Generation::new(2));
}

#[tokio::test]
async fn endless_races_end_in_contention() {
    let world = SimWorld::new(21, 1);
    let device = world.device(0);
    let publisher = world.publisher_with_store(RacingStore::new(usize::MAX, rival_entry()));

    let err = publisher.publish(&device.id, &device.signer, Deadline::none()).await.unwrap_err();

    let attempts = world.config.allocation_retries + 1;
    assert_eq!(err, EkError::GenerationContention { attempts });
    assert!(err.is_transient());
    assert_eq!(world.directory.record_count(), 0);
}
