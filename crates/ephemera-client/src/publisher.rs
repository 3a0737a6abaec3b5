//! Device EK publication.
//!
//! A publish mints a new generation: fresh seed, derived keypair, metadata
//! bound to a fresh Merkle root, signed by the device's identity key, stored
//! locally, then posted to the directory.
//!
//! # Crash and Cancellation Safety
//!
//! The seed is written to the local store as `Pending` before the post, in
//! one transaction. A publish that fails or is cancelled after that point
//! leaves the pending entry behind: it reserves its generation (so numbers
//! are never reused) but is invisible to decrypt-time lookups. If the
//! directory did accept the record, [`Publisher::reconcile`] promotes it
//! once it shows up in a verified fetch.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, info, warn};

use crate::{
    config::EkConfig,
    deadline::Deadline,
    directory::{DeviceId, KeyDirectory, PostDeviceEkRequest},
    env::Environment,
    error::EkError,
    identity::IdentitySigner,
    keygen::generate_device_seed,
    merkle::{FreshnessOracle, MerkleLog, MerkleRoot},
    metadata::{EkMetadata, Generation, SignedEkRecord, build_and_sign},
    storage::{EntryStatus, KeyStore, LocalKeyStoreEntry, StorageError},
};

/// Per-device async locks.
///
/// A publish holds its device's lock from root fetch to post, so one
/// process publishes a device's generations strictly in order. The store's
/// conflict check still guards against other processes.
///
/// Locks nobody holds or waits on are dropped on the next lookup, so the map
/// tracks in-flight devices rather than every device ever published.
#[derive(Default)]
struct DeviceLocks {
    locks: Mutex<HashMap<DeviceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceLocks {
    fn for_device(&self, device_id: &DeviceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(device_id.clone()).or_default())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Publishes new device EK generations.
pub struct Publisher<M, D, S, E> {
    oracle: FreshnessOracle<M, E>,
    directory: D,
    store: S,
    env: E,
    config: EkConfig,
    locks: DeviceLocks,
}

impl<M, D, S, E> Publisher<M, D, S, E>
where
    M: MerkleLog,
    D: KeyDirectory,
    S: KeyStore,
    E: Environment,
{
    /// Create a publisher over its collaborators.
    pub fn new(log: M, directory: D, store: S, env: E, config: EkConfig) -> Self {
        Self {
            oracle: FreshnessOracle::new(log, env.clone()),
            directory,
            store,
            env,
            config,
            locks: DeviceLocks::default(),
        }
    }

    /// Local key store backing this publisher.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mint, store and post a new generation for `device_id`.
    ///
    /// Returns the published metadata. Not idempotent: every call mints a new
    /// generation, so a caller that saw a transient failure should
    /// [`reconcile`](Self::reconcile) before retrying.
    ///
    /// # Errors
    ///
    /// - `StaleRootUnavailable`: no fresh Merkle root
    /// - `EntropyUnavailable`: seed generation failed
    /// - `SigningUnavailable`: the identity key could not sign; nothing stored
    /// - `GenerationContention`: lost every allocation race
    /// - `Storage`: the local store failed
    /// - `Directory`: the post failed; the generation stays pending
    /// - `DeadlineExceeded`: the deadline passed
    pub async fn publish<K: IdentitySigner + ?Sized>(
        &self,
        device_id: &DeviceId,
        signer: &K,
        deadline: Deadline,
    ) -> Result<EkMetadata, EkError> {
        deadline.check()?;

        let lock = self.locks.for_device(device_id);
        let _guard = deadline.run(lock.lock()).await?;

        let root = deadline.run(self.oracle.current_root(self.config.merkle_freshness)).await??;

        let (metadata, record) = self.allocate(device_id, signer, &root)?;

        let request =
            PostDeviceEkRequest { sig: record.into_wire(), device_id: device_id.clone() };
        let posted = deadline.run(self.directory.post_device_ek(request)).await.and_then(
            |result| result.map_err(|e| EkError::Directory(e.to_string())),
        );
        if let Err(err) = posted {
            warn!(
                device = %device_id,
                generation = %metadata.generation,
                error = %err,
                "device EK post failed; generation left pending"
            );
            return Err(err);
        }

        self.store.mark_published(device_id, metadata.generation)?;

        info!(
            device = %device_id,
            generation = %metadata.generation,
            kid = %metadata.kid,
            seqno = metadata.hash_meta.seqno,
            "published device EK"
        );
        Ok(metadata)
    }

    /// Pick the next generation, sign it and store it as pending.
    ///
    /// Re-reads the maximum after each lost race, up to the configured
    /// retry count.
    fn allocate<K: IdentitySigner + ?Sized>(
        &self,
        device_id: &DeviceId,
        signer: &K,
        root: &MerkleRoot,
    ) -> Result<(EkMetadata, SignedEkRecord), EkError> {
        let seed = generate_device_seed(&self.env)?;
        let kid = seed.derive_dh_keypair().kid();

        let attempts = self.config.allocation_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let generation = self.store.max_generation(device_id)?.next();
            let (metadata, record) = build_and_sign(kid, generation, root, signer)?;

            let entry = LocalKeyStoreEntry {
                generation,
                seed: seed.clone(),
                metadata,
                status: EntryStatus::Pending,
            };
            match self.store.put(device_id, &entry) {
                Ok(()) => return Ok((metadata, record)),
                Err(StorageError::Conflict { expected, got }) => {
                    debug!(device = %device_id, attempt, expected, got, "generation taken, retrying");
                },
                Err(err) => return Err(err.into()),
            }
        }

        Err(EkError::GenerationContention { attempts })
    }

    /// Promote pending generations that the directory did accept.
    ///
    /// `fetched` must come from a verified fetch of this device's records.
    /// A pending generation is promoted only if a fetched record carries the
    /// same generation and KID. Returns the promoted generations.
    ///
    /// # Errors
    ///
    /// `Storage` if the local store fails.
    pub fn reconcile(
        &self,
        device_id: &DeviceId,
        fetched: &[EkMetadata],
    ) -> Result<Vec<Generation>, EkError> {
        let mut promoted = Vec::new();

        for summary in self.store.generations(device_id)? {
            if summary.status != EntryStatus::Pending {
                continue;
            }

            let accepted = fetched
                .iter()
                .any(|record| record.generation == summary.generation && record.kid == summary.kid);
            if accepted {
                self.store.mark_published(device_id, summary.generation)?;
                promoted.push(summary.generation);
            }
        }

        if !promoted.is_empty() {
            info!(device = %device_id, ?promoted, "reconciled pending device EKs");
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use ephemera_crypto::VerifyingKey;

    use super::*;
    use crate::{
        directory::{DeviceEksResponse, DirectoryError},
        env::EntropyError,
        identity::{DeviceSigningKey, SigningError},
        merkle::MerkleError,
        storage::MemoryKeyStore,
    };

    #[derive(Clone)]
    struct FixedEnv;

    impl Environment for FixedEnv {
        fn wall_clock_secs(&self) -> u64 {
            1_000
        }

        fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
            buffer.fill(0x01);
            Ok(())
        }
    }

    struct FixedLog;

    #[async_trait]
    impl MerkleLog for FixedLog {
        async fn fetch_current_root(
            &self,
            _max_staleness: Duration,
        ) -> Result<MerkleRoot, MerkleError> {
            Ok(MerkleRoot { hash: [9; 32], seqno: 100, ctime: 1_000, fetched_at: 1_000 })
        }
    }

    #[derive(Default)]
    struct FlakyDirectory {
        fail: AtomicBool,
        posted: Mutex<Vec<PostDeviceEkRequest>>,
    }

    #[async_trait]
    impl KeyDirectory for FlakyDirectory {
        async fn post_device_ek(
            &self,
            request: PostDeviceEkRequest,
        ) -> Result<(), DirectoryError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DirectoryError::Transport("connection reset".to_string()));
            }
            self.posted.lock().unwrap().push(request);
            Ok(())
        }

        async fn fetch_device_eks(&self) -> Result<DeviceEksResponse, DirectoryError> {
            Ok(DeviceEksResponse::default())
        }
    }

    struct RevokedSigner;

    impl IdentitySigner for RevokedSigner {
        fn sign_to_string(&self, _payload: &[u8]) -> Result<String, SigningError> {
            Err(SigningError::Revoked)
        }

        fn verifying_key(&self) -> Result<VerifyingKey, SigningError> {
            Err(SigningError::Revoked)
        }
    }

    fn publisher(
        directory: Arc<FlakyDirectory>,
    ) -> Publisher<FixedLog, Arc<FlakyDirectory>, MemoryKeyStore, FixedEnv> {
        Publisher::new(FixedLog, directory, MemoryKeyStore::new(), FixedEnv, EkConfig::default())
    }

    #[tokio::test]
    async fn publish_stores_and_posts() {
        let directory = Arc::new(FlakyDirectory::default());
        let publisher = publisher(Arc::clone(&directory));
        let device = DeviceId::new("d1");
        let signer = DeviceSigningKey::from_bytes(&[7; 32]);

        let metadata = publisher.publish(&device, &signer, Deadline::none()).await.unwrap();

        assert_eq!(metadata.generation, Generation::new(1));
        assert_eq!(metadata.hash_meta.seqno, 100);

        let stored = publisher.store().get(&device, Generation::new(1)).unwrap().unwrap();
        assert_eq!(stored.metadata, metadata);
        assert_eq!(stored.seed.derive_dh_keypair().kid(), metadata.kid);

        let posted = directory.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].device_id, device);
    }

    #[tokio::test]
    async fn failed_post_leaves_pending_generation_that_does_not_block() {
        let directory = Arc::new(FlakyDirectory::default());
        directory.fail.store(true, Ordering::SeqCst);
        let publisher = publisher(Arc::clone(&directory));
        let device = DeviceId::new("d1");
        let signer = DeviceSigningKey::from_bytes(&[7; 32]);

        let err = publisher.publish(&device, &signer, Deadline::none()).await.unwrap_err();
        assert!(matches!(err, EkError::Directory(_)));
        assert!(err.is_transient());
        assert_eq!(publisher.store().get(&device, Generation::new(1)).unwrap(), None);
        assert_eq!(publisher.store().max_generation(&device).unwrap(), Generation::new(1));

        directory.fail.store(false, Ordering::SeqCst);
        let metadata = publisher.publish(&device, &signer, Deadline::none()).await.unwrap();
        assert_eq!(metadata.generation, Generation::new(2));
    }

    #[tokio::test]
    async fn signing_failure_stores_nothing() {
        let publisher = publisher(Arc::new(FlakyDirectory::default()));
        let device = DeviceId::new("d1");

        let err = publisher.publish(&device, &RevokedSigner, Deadline::none()).await.unwrap_err();
        assert!(matches!(err, EkError::SigningUnavailable(_)));
        assert_eq!(publisher.store().max_generation(&device).unwrap(), Generation::ZERO);
    }

    #[tokio::test]
    async fn reconcile_promotes_only_matching_records() {
        let directory = Arc::new(FlakyDirectory::default());
        directory.fail.store(true, Ordering::SeqCst);
        let publisher = publisher(Arc::clone(&directory));
        let device = DeviceId::new("d1");
        let signer = DeviceSigningKey::from_bytes(&[7; 32]);

        publisher.publish(&device, &signer, Deadline::none()).await.unwrap_err();
        let pending = publisher.store().generations(&device).unwrap()[0];

        let mismatched = EkMetadata {
            kid: ephemera_crypto::Kid::from_bytes([0; 32]),
            generation: pending.generation,
            hash_meta: pending.hash_meta,
        };
        assert!(publisher.reconcile(&device, &[mismatched]).unwrap().is_empty());

        let accepted = EkMetadata {
            kid: pending.kid,
            generation: pending.generation,
            hash_meta: pending.hash_meta,
        };
        assert_eq!(publisher.reconcile(&device, &[accepted]).unwrap(), vec![Generation::new(1)]);
        assert!(publisher.store().get(&device, Generation::new(1)).unwrap().is_some());
    }

    #[tokio::test]
    async fn idle_device_locks_are_released() {
        let publisher = publisher(Arc::new(FlakyDirectory::default()));
        let signer = DeviceSigningKey::from_bytes(&[7; 32]);

        for index in 0..16 {
            let device = DeviceId::new(format!("d{index}"));
            publisher.publish(&device, &signer, Deadline::none()).await.unwrap();
        }
        assert_eq!(publisher.locks.tracked(), 1);

        // A held lock survives other devices' lookups.
        let held = publisher.locks.for_device(&DeviceId::new("busy"));
        let _guard = held.lock().await;
        publisher.publish(&DeviceId::new("d0"), &signer, Deadline::none()).await.unwrap();
        assert_eq!(publisher.locks.tracked(), 2);
        assert!(Arc::ptr_eq(&held, &publisher.locks.for_device(&DeviceId::new("busy"))));
    }

    #[tokio::test]
    async fn expired_deadline_fails_before_any_work() {
        let publisher = publisher(Arc::new(FlakyDirectory::default()));
        let device = DeviceId::new("d1");
        let signer = DeviceSigningKey::from_bytes(&[7; 32]);

        let deadline = Deadline::at(tokio::time::Instant::now() - Duration::from_secs(1));
        let err = publisher.publish(&device, &signer, deadline).await.unwrap_err();

        assert_eq!(err, EkError::DeadlineExceeded);
        assert_eq!(publisher.store().max_generation(&device).unwrap(), Generation::ZERO);
    }
}
