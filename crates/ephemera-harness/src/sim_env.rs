//! Deterministic environment.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use ephemera_client::{EntropyError, Environment};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Simulated environment with a settable clock and a seeded RNG.
///
/// Clones share the clock and the RNG stream, so every collaborator built
/// from one `SimEnv` sees the same time. Same seed, same random bytes.
#[derive(Clone)]
pub struct SimEnv {
    now_secs: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha20Rng>>,
    entropy_down: Arc<AtomicBool>,
}

impl SimEnv {
    /// Default simulation start: 2024-01-01T00:00:00Z.
    pub const EPOCH: u64 = 1_704_067_200;

    /// Environment with the default seed.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            now_secs: Arc::new(AtomicU64::new(Self::EPOCH)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            entropy_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> u64 {
        self.now_secs.load(Ordering::SeqCst)
    }

    /// Set the simulated time.
    pub fn set_time(&self, secs: u64) {
        self.now_secs.store(secs, Ordering::SeqCst);
    }

    /// Advance the simulated time.
    pub fn advance(&self, secs: u64) {
        self.now_secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Make `random_bytes` fail until re-enabled.
    pub fn set_entropy_available(&self, available: bool) {
        self.entropy_down.store(!available, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        if self.entropy_down.load(Ordering::SeqCst) {
            return Err(EntropyError("simulated entropy failure".to_string()));
        }
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
        Ok(())
    }
}
