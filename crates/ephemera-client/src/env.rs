//! Environment abstraction for deterministic testing.
//!
//! Decouples key lifecycle logic from system resources (wall clock,
//! randomness). Production uses the OS clock and CSPRNG; simulations inject a
//! controllable clock and a seeded RNG.

use thiserror::Error;

/// The environment could not provide secure randomness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("random source failed: {0}")]
pub struct EntropyError(pub String);

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `random_bytes()` reports failure instead of returning weak bytes
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time as seconds since the Unix epoch.
    ///
    /// Used to judge Merkle root staleness and retention ages.
    fn wall_clock_secs(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, simulations produce the same sequence
    /// - On error the buffer contents must not be used
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;
}

/// Production environment using system time and cryptographic RNG.
///
/// The RNG uses getrandom, which provides OS-level cryptographic randomness
/// (e.g. `getrandom(2)` on Linux, `BCryptGenRandom` on Windows). Unlike a
/// server that can only abort, an RNG failure here surfaces as an error so
/// the caller decides what to do.
#[derive(Clone, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|e| EntropyError(e.to_string()))
    }
}
