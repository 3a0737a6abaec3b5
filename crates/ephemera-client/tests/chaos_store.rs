//! Chaos property tests for `KeyStore` implementations
//!
//! Allocation loops run against `ChaoticKeyStore` and must leave the inner
//! store consistent:
//! - Generations are contiguous from 1 with no gaps or reuse
//! - Every stored seed still derives the KID in its metadata
//! - Failed operations never write anything

use ephemera_client::{
    ChaoticKeyStore, DeviceId, EkMetadata, EntryStatus, Generation, HashMeta, KeyStore,
    LocalKeyStoreEntry, MemoryKeyStore, RedbKeyStore, StorageError,
};
use ephemera_crypto::{DeviceEphemeralSeed, EphemeralSeed, StoreKey};
use proptest::prelude::*;
use tempfile::tempdir;

fn create_entry(generation: Generation, seed_byte: u8) -> LocalKeyStoreEntry {
    let seed = DeviceEphemeralSeed::new(EphemeralSeed::from_bytes([seed_byte; 32]));
    let kid = seed.derive_dh_keypair().kid();
    LocalKeyStoreEntry {
        generation,
        seed,
        metadata: EkMetadata {
            kid,
            generation,
            hash_meta: HashMeta { hash: [0; 32], seqno: 1, ctime: 1 },
        },
        status: EntryStatus::Pending,
    }
}

/// Allocate `attempts` generations through a chaotic store, the way a
/// publisher does: read the max, then put max + 1.
fn allocate_under_chaos<S: KeyStore>(store: &S, device: &DeviceId, attempts: usize) -> u64 {
    let mut successful = 0u64;
    for attempt in 0..attempts {
        let Ok(max) = store.max_generation(device) else {
            continue;
        };
        match store.put(device, &create_entry(max.next(), attempt as u8)) {
            Ok(()) => successful += 1,
            Err(StorageError::Io(_)) => {},
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }
    successful
}

/// Verify generations are exactly `1..=expected` and seeds match KIDs.
fn verify_generations<S: KeyStore>(store: &S, device: &DeviceId, expected: u64) {
    let summaries = store.generations(device).unwrap();
    let generations: Vec<u64> = summaries.iter().map(|summary| summary.generation.value()).collect();
    assert_eq!(generations, (1..=expected).collect::<Vec<_>>());
    assert_eq!(store.max_generation(device).unwrap(), Generation::new(expected));

    for summary in summaries {
        store.mark_published(device, summary.generation).unwrap();
        let entry = store.get(device, summary.generation).unwrap().unwrap();
        assert_eq!(entry.seed.derive_dh_keypair().kid(), summary.kid);
    }
}

#[test]
fn prop_memory_store_chaos_no_gaps() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        attempts in 10usize..100,
    )| {
        let store = ChaoticKeyStore::with_seed(MemoryKeyStore::new(), failure_rate, seed);
        let device = DeviceId::new("laptop");

        let successful = allocate_under_chaos(&store, &device, attempts);

        // ORACLE: exactly the successful puts are visible, contiguous from 1
        verify_generations(store.inner(), &device, successful);
        prop_assert_eq!(store.inner().entry_count() as u64, successful);
    });
}

#[test]
fn prop_redb_store_chaos_no_gaps() {
    proptest!(ProptestConfig::with_cases(16), |(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        attempts in 5usize..30,
    )| {
        let dir = tempdir().unwrap();
        let inner = RedbKeyStore::open(dir.path().join("keys.redb"), StoreKey::from_bytes([7; 32]))
            .unwrap();
        let store = ChaoticKeyStore::with_seed(inner, failure_rate, seed);
        let device = DeviceId::new("laptop");

        let successful = allocate_under_chaos(&store, &device, attempts);

        verify_generations(store.inner(), &device, successful);
    });
}

#[test]
fn chaotic_store_counts_every_operation() {
    let store = ChaoticKeyStore::with_seed(MemoryKeyStore::new(), 0.3, 42);
    let device = DeviceId::new("laptop");

    allocate_under_chaos(&store, &device, 20);

    // Each attempt reads the max; puts are only attempted after a good read.
    assert!(store.operation_count() >= 20);
    assert!(store.operation_count() <= 40);
}
