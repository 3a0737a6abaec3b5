//! Lifecycle configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::RetentionPolicy;

/// Default staleness bound for Merkle roots used by publish and fetch
pub const EPHEMERAL_KEY_MERKLE_FRESHNESS: Duration = Duration::from_secs(30);

/// Default lifetime of a device ephemeral key (one week)
pub const DEFAULT_KEY_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of times a publish re-reads the maximum generation after
/// losing an allocation race
pub const DEFAULT_ALLOCATION_RETRIES: u32 = 3;

/// Default number of newest published generations kept regardless of age
pub const DEFAULT_KEEP_LATEST: usize = 5;

/// Default age after which superseded generations may be pruned (30 days)
pub const DEFAULT_RETENTION_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Retention settings as configured.
///
/// Turned into an enforceable [`RetentionPolicy`] by
/// [`EkConfig::effective_retention`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Newest published generations that are always kept
    pub keep_latest: usize,
    /// Requested minimum age before an entry may be removed
    pub max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { keep_latest: DEFAULT_KEEP_LATEST, max_age: DEFAULT_RETENTION_AGE }
    }
}

/// Configuration shared by the publisher and fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkConfig {
    /// Maximum age of the Merkle root fetched before publishing or verifying
    pub merkle_freshness: Duration,

    /// Freshness window: records bound to a root older than this, relative
    /// to the verifier's root, are expired
    pub key_lifetime: Duration,

    /// Allocation retries after a generation conflict
    pub allocation_retries: u32,

    /// Local store retention
    pub retention: RetentionConfig,
}

impl Default for EkConfig {
    fn default() -> Self {
        Self {
            merkle_freshness: EPHEMERAL_KEY_MERKLE_FRESHNESS,
            key_lifetime: DEFAULT_KEY_LIFETIME,
            allocation_retries: DEFAULT_ALLOCATION_RETRIES,
            retention: RetentionConfig::default(),
        }
    }
}

impl EkConfig {
    /// Retention policy with its age bound raised to at least the key
    /// lifetime.
    ///
    /// A seed must outlive every peer's view of its key, so no policy may
    /// prune inside the freshness window.
    pub fn effective_retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention.keep_latest, self.retention.max_age, self.key_lifetime)
    }
}
