//! Merkle roots and the freshness oracle.
//!
//! The tamper-evident log itself is external. This module consumes its
//! "fetch current root" capability and enforces the staleness bound on what
//! comes back.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{env::Environment, error::EkError};

/// Snapshot of the Merkle log: root hash plus when and where it was observed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MerkleRoot {
    /// Root hash commitment
    pub hash: [u8; 32],
    /// Log sequence number of this root
    pub seqno: u64,
    /// Creation time of the root, seconds since the Unix epoch
    pub ctime: u64,
    /// When this client observed the root, seconds since the Unix epoch
    pub fetched_at: u64,
}

impl MerkleRoot {
    /// Reference to this root for embedding in signed metadata.
    pub fn hash_meta(&self) -> HashMeta {
        HashMeta { hash: self.hash, seqno: self.seqno, ctime: self.ctime }
    }

    /// Seconds between a bound root's creation and this root's creation.
    ///
    /// Zero if the bound root is newer than this one.
    pub fn age_of(&self, bound: &HashMeta) -> Duration {
        Duration::from_secs(self.ctime.saturating_sub(bound.ctime))
    }
}

impl fmt::Debug for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleRoot")
            .field("hash", &hex_prefix(&self.hash))
            .field("seqno", &self.seqno)
            .field("ctime", &self.ctime)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

/// Reference to a Merkle root, bound into signed EK metadata.
///
/// Carries the root's creation time so a verifier can compute a record's age
/// against its own current root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashMeta {
    /// Root hash commitment
    pub hash: [u8; 32],
    /// Log sequence number of the root
    pub seqno: u64,
    /// Creation time of the root, seconds since the Unix epoch
    pub ctime: u64,
}

impl fmt::Debug for HashMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMeta")
            .field("hash", &hex_prefix(&self.hash))
            .field("seqno", &self.seqno)
            .field("ctime", &self.ctime)
            .finish()
    }
}

fn hex_prefix(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

/// Failures reported by the Merkle log collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// The log could not provide a root within the requested bound
    #[error("no sufficiently fresh root: {0}")]
    NoFreshRoot(String),

    /// The log could not be reached
    #[error("transport error: {0}")]
    Transport(String),
}

/// The tamper-evident log's client.
#[async_trait]
pub trait MerkleLog: Send + Sync {
    /// Fetch the current root, observed no longer than `max_staleness` ago.
    async fn fetch_current_root(&self, max_staleness: Duration)
    -> Result<MerkleRoot, MerkleError>;
}

#[async_trait]
impl<T: MerkleLog + ?Sized> MerkleLog for Arc<T> {
    async fn fetch_current_root(
        &self,
        max_staleness: Duration,
    ) -> Result<MerkleRoot, MerkleError> {
        (**self).fetch_current_root(max_staleness).await
    }
}

/// Freshness oracle over a Merkle log client.
///
/// Delegates to the log, then re-checks the observation time against the
/// environment clock so a misbehaving collaborator cannot hand back a stale
/// root. Does not retry; retry policy belongs to the log's transport.
#[derive(Clone)]
pub struct FreshnessOracle<M, E> {
    log: M,
    env: E,
}

impl<M: MerkleLog, E: Environment> FreshnessOracle<M, E> {
    /// Wrap a log client.
    pub fn new(log: M, env: E) -> Self {
        Self { log, env }
    }

    /// Current root observed within `max_staleness`.
    ///
    /// # Errors
    ///
    /// `StaleRootUnavailable` if the log fails or returns a root observed
    /// more than `max_staleness` ago.
    pub async fn current_root(&self, max_staleness: Duration) -> Result<MerkleRoot, EkError> {
        let root = self.log.fetch_current_root(max_staleness).await.map_err(|err| {
            warn!(error = %err, ?max_staleness, "merkle root fetch failed");
            EkError::StaleRootUnavailable { max_staleness, reason: err.to_string() }
        })?;

        let observed_age =
            Duration::from_secs(self.env.wall_clock_secs().saturating_sub(root.fetched_at));
        if observed_age > max_staleness {
            warn!(seqno = root.seqno, ?observed_age, ?max_staleness, "merkle root too stale");
            return Err(EkError::StaleRootUnavailable {
                max_staleness,
                reason: format!("root {} observed {observed_age:?} ago", root.seqno),
            });
        }

        debug!(seqno = root.seqno, ctime = root.ctime, "fetched merkle root");
        Ok(root)
    }
}
