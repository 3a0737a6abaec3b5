//! Simulated Merkle log.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use ephemera_client::{MerkleError, MerkleLog, MerkleRoot};

use crate::sim_env::SimEnv;

/// Merkle log whose current root is set by the test.
///
/// Roots are observed at the environment's current time minus a
/// configurable lag. The lag ignores the requested staleness bound, which
/// lets tests check that the oracle catches a misbehaving cache.
#[derive(Clone)]
pub struct SimMerkleLog {
    env: SimEnv,
    state: Arc<Mutex<LogState>>,
}

struct LogState {
    seqno: u64,
    ctime: u64,
    lag_secs: u64,
    available: bool,
    fetches: usize,
}

impl SimMerkleLog {
    /// Log whose first root (seqno 1) was created at the environment's
    /// current time.
    pub fn new(env: SimEnv) -> Self {
        let ctime = env.now();
        Self {
            env,
            state: Arc::new(Mutex::new(LogState {
                seqno: 1,
                ctime,
                lag_secs: 0,
                available: true,
                fetches: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a root with `seqno`, created now.
    pub fn advance_to(&self, seqno: u64) {
        let ctime = self.env.now();
        self.set_root(seqno, ctime);
    }

    /// Set the current root explicitly.
    pub fn set_root(&self, seqno: u64, ctime: u64) {
        let mut state = self.lock();
        state.seqno = seqno;
        state.ctime = ctime;
    }

    /// Serve roots observed `secs` ago.
    pub fn set_lag(&self, secs: u64) {
        self.lock().lag_secs = secs;
    }

    /// Make the log unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Number of root fetches served or refused.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Deterministic root hash for a sequence number.
    pub fn root_hash(seqno: u64) -> [u8; 32] {
        let mut hash = [0x5e; 32];
        hash[..8].copy_from_slice(&seqno.to_be_bytes());
        hash
    }
}

#[async_trait]
impl MerkleLog for SimMerkleLog {
    async fn fetch_current_root(
        &self,
        max_staleness: Duration,
    ) -> Result<MerkleRoot, MerkleError> {
        let mut state = self.lock();
        state.fetches += 1;

        if !state.available {
            return Err(MerkleError::NoFreshRoot(format!(
                "log unreachable (wanted root within {max_staleness:?})"
            )));
        }

        Ok(MerkleRoot {
            hash: Self::root_hash(state.seqno),
            seqno: state.seqno,
            ctime: state.ctime,
            fetched_at: self.env.now().saturating_sub(state.lag_secs),
        })
    }
}
