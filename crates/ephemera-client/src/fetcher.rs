//! Fetching and verifying device EK records.
//!
//! Every record the directory returns goes through three checks, in order:
//!
//! 1. Signature: the packet must verify
//! 2. Identity binding: the signer must be one of the user's devices
//! 3. Expiry: the bound root must be within the key lifetime of the
//!    verifier's own current root
//!
//! Failing 1 or 2 (or carrying a non-canonical payload under a valid
//! signature) aborts the whole fetch: the batch may be forged or corrupted,
//! and returning the rest would hide that. Failing 3 only drops the record.
//! The directory returns expired records on purpose.

use tracing::{debug, warn};

use crate::{
    config::EkConfig,
    deadline::Deadline,
    directory::{DeviceId, KeyDirectory},
    env::Environment,
    error::EkError,
    identity::{DeviceRegistry, hex_key},
    merkle::{FreshnessOracle, MerkleLog},
    metadata::{EkMetadata, SignedEkRecord},
};

/// A verified, unexpired record together with the device that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEk {
    /// Device that signed the record
    pub device_id: DeviceId,
    /// Verified metadata
    pub metadata: EkMetadata,
}

/// Fetches and verifies device EK records.
pub struct Fetcher<M, D, R, E> {
    oracle: FreshnessOracle<M, E>,
    directory: D,
    registry: R,
    config: EkConfig,
}

impl<M, D, R, E> Fetcher<M, D, R, E>
where
    M: MerkleLog,
    D: KeyDirectory,
    R: DeviceRegistry,
    E: Environment,
{
    /// Create a fetcher over its collaborators.
    pub fn new(log: M, directory: D, registry: R, env: E, config: EkConfig) -> Self {
        Self { oracle: FreshnessOracle::new(log, env), directory, registry, config }
    }

    /// Every valid, unexpired record of the user's devices, in server order.
    ///
    /// # Errors
    ///
    /// - `SignatureInvalid`, `UnknownDeviceKey`, `MalformedRecord`: a record
    ///   failed verification; no records are returned
    /// - `Directory`, `StaleRootUnavailable`, `DeadlineExceeded`: recoverable
    pub async fn fetch_all_device_eks(&self, deadline: Deadline) -> Result<Vec<DeviceEk>, EkError> {
        let response = deadline
            .run(self.directory.fetch_device_eks())
            .await?
            .map_err(|e| EkError::Directory(e.to_string()))?;

        let root = deadline.run(self.oracle.current_root(self.config.merkle_freshness)).await??;

        let mut accepted = Vec::with_capacity(response.results.len());
        let mut expired = 0usize;

        for (index, element) in response.results.into_iter().enumerate() {
            let (signer, payload) = SignedEkRecord::from_wire(element.sig).verify().map_err(
                |err| {
                    warn!(index, error = %err, "device EK record failed signature check");
                    err
                },
            )?;

            let Some(device_id) = self.registry.device_for_key(&signer) else {
                let signer = hex_key(&signer);
                warn!(index, %signer, "device EK record signed by unknown key");
                return Err(EkError::UnknownDeviceKey { signer });
            };

            let metadata = EkMetadata::decode_canonical(&payload).map_err(|err| {
                warn!(index, device = %device_id, error = %err, "malformed device EK record");
                err
            })?;

            if metadata.is_expired_at(&root, self.config.key_lifetime) {
                expired += 1;
                continue;
            }

            accepted.push(DeviceEk { device_id, metadata });
        }

        debug!(
            accepted = accepted.len(),
            expired,
            verifier_seqno = root.seqno,
            "fetched device EKs"
        );
        Ok(accepted)
    }

    /// Valid, unexpired records signed by `device_id`, in server order.
    ///
    /// Verifies the whole batch first, so a forged record for any device
    /// fails this call too.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_all_device_eks`](Self::fetch_all_device_eks).
    pub async fn fetch_own_device_eks(
        &self,
        device_id: &DeviceId,
        deadline: Deadline,
    ) -> Result<Vec<EkMetadata>, EkError> {
        Ok(self
            .fetch_all_device_eks(deadline)
            .await?
            .into_iter()
            .filter(|record| &record.device_id == device_id)
            .map(|record| record.metadata)
            .collect())
    }
}
