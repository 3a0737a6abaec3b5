//! Chaotic key store wrapper for fault injection testing
//!
//! Randomly fails operations to test that publish and prune surface storage
//! failures without corrupting generation allocation.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use super::{EntrySummary, KeyStore, LocalKeyStoreEntry, RetentionPolicy, StorageError};
use crate::{directory::DeviceId, metadata::Generation};

/// Key store wrapper that randomly injects I/O failures.
///
/// Delegates to an underlying store but fails operations with probability
/// `failure_rate`. Failures are injected before delegation, so a failed call
/// never reaches the inner store.
#[derive(Clone)]
pub struct ChaoticKeyStore<S: KeyStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, failed ones included
    operation_count: Arc<AtomicUsize>,
}

/// Linear congruential generator; chaos runs are reproducible per seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: KeyStore> ChaoticKeyStore<S> {
    /// Wrap `inner` with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn chaos(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let roll = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next();
        if roll < self.failure_rate {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: KeyStore> KeyStore for ChaoticKeyStore<S> {
    fn put(&self, device_id: &DeviceId, entry: &LocalKeyStoreEntry) -> Result<(), StorageError> {
        self.chaos()?;
        self.inner.put(device_id, entry)
    }

    fn get(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<Option<LocalKeyStoreEntry>, StorageError> {
        self.chaos()?;
        self.inner.get(device_id, generation)
    }

    fn max_generation(&self, device_id: &DeviceId) -> Result<Generation, StorageError> {
        self.chaos()?;
        self.inner.max_generation(device_id)
    }

    fn mark_published(
        &self,
        device_id: &DeviceId,
        generation: Generation,
    ) -> Result<(), StorageError> {
        self.chaos()?;
        self.inner.mark_published(device_id, generation)
    }

    fn generations(&self, device_id: &DeviceId) -> Result<Vec<EntrySummary>, StorageError> {
        self.chaos()?;
        self.inner.generations(device_id)
    }

    fn prune(
        &self,
        device_id: &DeviceId,
        policy: &RetentionPolicy,
        now_secs: u64,
    ) -> Result<usize, StorageError> {
        self.chaos()?;
        self.inner.prune(device_id, policy, now_secs)
    }
}
