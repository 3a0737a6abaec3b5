//! Seed generation.

use ephemera_crypto::{DeviceEphemeralSeed, EPHEMERAL_SEED_SIZE, EphemeralSeed};
use zeroize::Zeroizing;

use crate::{env::Environment, error::EkError};

/// Draw a fresh device EK seed from the environment's secure random source.
///
/// # Errors
///
/// `EntropyUnavailable` if the random source fails. Not retried here.
pub fn generate_device_seed<E: Environment>(env: &E) -> Result<DeviceEphemeralSeed, EkError> {
    let mut bytes = Zeroizing::new([0u8; EPHEMERAL_SEED_SIZE]);
    env.random_bytes(bytes.as_mut_slice())
        .map_err(|e| EkError::EntropyUnavailable(e.0))?;

    Ok(DeviceEphemeralSeed::new(EphemeralSeed::from_bytes(*bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EntropyError, SystemEnv};

    #[derive(Clone)]
    struct DeadEntropy;

    impl Environment for DeadEntropy {
        fn wall_clock_secs(&self) -> u64 {
            0
        }

        fn random_bytes(&self, _buffer: &mut [u8]) -> Result<(), EntropyError> {
            Err(EntropyError("device not configured".to_string()))
        }
    }

    #[test]
    fn fresh_seeds_differ() {
        let env = SystemEnv::new();

        let first = generate_device_seed(&env).unwrap();
        let second = generate_device_seed(&env).unwrap();
        assert_ne!(first, second);
        assert_ne!(first.derive_dh_keypair().kid(), second.derive_dh_keypair().kid());
    }

    #[test]
    fn entropy_failure_is_surfaced() {
        let err = generate_device_seed(&DeadEntropy).unwrap_err();
        assert_eq!(err, EkError::EntropyUnavailable("device not configured".to_string()));
        assert!(!err.is_transient());
    }
}
