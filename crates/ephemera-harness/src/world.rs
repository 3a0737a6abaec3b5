//! A simulated user with several devices.

use std::sync::Arc;

use ephemera_client::{
    DeviceId, DeviceSigningKey, EkConfig, Fetcher, IdentitySigner, KeyStore, MemoryKeyStore,
    Publisher, StaticDeviceRegistry,
};

use crate::{sim_directory::SimDirectory, sim_env::SimEnv, sim_merkle::SimMerkleLog};

/// One of the user's devices.
pub struct SimDevice {
    /// Device identifier
    pub id: DeviceId,
    /// Long-term identity key
    pub signer: DeviceSigningKey,
}

/// Publisher type used by simulated worlds.
pub type SimPublisher<S = MemoryKeyStore> = Publisher<SimMerkleLog, SimDirectory, S, SimEnv>;

/// Fetcher type used by simulated worlds.
pub type SimFetcher = Fetcher<SimMerkleLog, SimDirectory, Arc<StaticDeviceRegistry>, SimEnv>;

/// A user, their devices and every collaborator, sharing one clock.
pub struct SimWorld {
    /// Shared environment (clock and RNG)
    pub env: SimEnv,
    /// Shared Merkle log
    pub log: SimMerkleLog,
    /// The user's directory on the server
    pub directory: SimDirectory,
    /// Registry of the user's current device keys
    pub registry: Arc<StaticDeviceRegistry>,
    /// The user's devices, in creation order
    pub devices: Vec<SimDevice>,
    /// Configuration for every publisher and fetcher
    pub config: EkConfig,
}

impl SimWorld {
    /// World with `device_count` devices named `d1`, `d2`, ...
    ///
    /// Identity keys are derived from the seed, so the same seed builds the
    /// same world.
    pub fn new(seed: u64, device_count: usize) -> Self {
        let env = SimEnv::with_seed(seed);
        let log = SimMerkleLog::new(env.clone());

        let mut registry = StaticDeviceRegistry::new();
        let devices: Vec<SimDevice> = (1..=device_count)
            .map(|index| {
                let mut secret = [0u8; 32];
                secret[..8].copy_from_slice(&seed.to_be_bytes());
                secret[8..16].copy_from_slice(&(index as u64).to_be_bytes());
                let signer = DeviceSigningKey::from_bytes(&secret);
                let id = DeviceId::new(format!("d{index}"));
                if let Ok(key) = signer.verifying_key() {
                    registry.insert(id.clone(), key);
                }
                SimDevice { id, signer }
            })
            .collect();

        Self {
            env,
            log,
            directory: SimDirectory::new(),
            registry: Arc::new(registry),
            devices,
            config: EkConfig::default(),
        }
    }

    /// Device by index.
    pub fn device(&self, index: usize) -> &SimDevice {
        &self.devices[index]
    }

    /// Publisher backed by a fresh in-memory store.
    pub fn publisher(&self) -> SimPublisher {
        self.publisher_with_store(MemoryKeyStore::new())
    }

    /// Publisher backed by `store`.
    pub fn publisher_with_store<S: KeyStore>(&self, store: S) -> SimPublisher<S> {
        Publisher::new(
            self.log.clone(),
            self.directory.clone(),
            store,
            self.env.clone(),
            self.config.clone(),
        )
    }

    /// Fetcher trusting the world's registry.
    pub fn fetcher(&self) -> SimFetcher {
        Fetcher::new(
            self.log.clone(),
            self.directory.clone(),
            Arc::clone(&self.registry),
            self.env.clone(),
            self.config.clone(),
        )
    }
}
