//! Long-term identity collaborators.
//!
//! The device's long-term signing key and the registry of the user's device
//! keys live outside this crate. These traits are the seams through which the
//! lifecycle code signs metadata and binds fetched records to a device.

use std::{collections::HashMap, fmt, sync::Arc};

use ephemera_crypto::{SigningKey, VerifyingKey, sign_to_string};
use thiserror::Error;

use crate::directory::DeviceId;

/// The signing collaborator could not produce a signature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// Key is not loaded or is locked behind a passphrase
    #[error("signing key unavailable: {0}")]
    Unavailable(String),

    /// Key has been revoked and must not sign new statements
    #[error("signing key revoked")]
    Revoked,
}

/// Signs payloads with the device's long-term identity key.
pub trait IdentitySigner: Send + Sync {
    /// Sign `payload`, returning a self-describing signed packet string.
    fn sign_to_string(&self, payload: &[u8]) -> Result<String, SigningError>;

    /// Public half of the signing key.
    fn verifying_key(&self) -> Result<VerifyingKey, SigningError>;
}

impl<T: IdentitySigner + ?Sized> IdentitySigner for Arc<T> {
    fn sign_to_string(&self, payload: &[u8]) -> Result<String, SigningError> {
        (**self).sign_to_string(payload)
    }

    fn verifying_key(&self) -> Result<VerifyingKey, SigningError> {
        (**self).verifying_key()
    }
}

/// In-process Ed25519 device signing key.
pub struct DeviceSigningKey {
    key: SigningKey,
}

impl DeviceSigningKey {
    /// Wrap an Ed25519 signing key.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Build from a 32-byte Ed25519 secret.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(secret) }
    }
}

impl fmt::Debug for DeviceSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSigningKey")
            .field("public", &hex_key(&self.key.verifying_key()))
            .finish_non_exhaustive()
    }
}

impl IdentitySigner for DeviceSigningKey {
    fn sign_to_string(&self, payload: &[u8]) -> Result<String, SigningError> {
        Ok(sign_to_string(&self.key, payload))
    }

    fn verifying_key(&self) -> Result<VerifyingKey, SigningError> {
        Ok(self.key.verifying_key())
    }
}

/// Registry of the current user's device signing keys.
///
/// Used to bind a fetched record to one of our devices. A record whose
/// signer is not in the registry is rejected even if its signature is valid.
pub trait DeviceRegistry: Send + Sync {
    /// Device that owns `key`, if it is one of the user's current devices.
    fn device_for_key(&self, key: &VerifyingKey) -> Option<DeviceId>;

    /// Whether `key` belongs to one of the user's current devices.
    fn is_known_device_key(&self, key: &VerifyingKey) -> bool {
        self.device_for_key(key).is_some()
    }
}

impl<T: DeviceRegistry + ?Sized> DeviceRegistry for Arc<T> {
    fn device_for_key(&self, key: &VerifyingKey) -> Option<DeviceId> {
        (**self).device_for_key(key)
    }

    fn is_known_device_key(&self, key: &VerifyingKey) -> bool {
        (**self).is_known_device_key(key)
    }
}

/// Fixed device registry built from a snapshot of the user's devices.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceRegistry {
    devices: HashMap<[u8; 32], DeviceId>,
}

impl StaticDeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device signing key.
    pub fn insert(&mut self, device_id: DeviceId, key: VerifyingKey) {
        self.devices.insert(key.to_bytes(), device_id);
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with_device(mut self, device_id: DeviceId, key: VerifyingKey) -> Self {
        self.insert(device_id, key);
        self
    }

    /// Remove a device (e.g. after revocation).
    pub fn remove(&mut self, key: &VerifyingKey) -> Option<DeviceId> {
        self.devices.remove(&key.to_bytes())
    }
}

impl DeviceRegistry for StaticDeviceRegistry {
    fn device_for_key(&self, key: &VerifyingKey) -> Option<DeviceId> {
        self.devices.get(&key.to_bytes()).cloned()
    }
}

pub(crate) fn hex_key(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use ephemera_crypto::verify_and_extract;

    use super::*;

    #[test]
    fn device_key_signs_verifiable_packets() {
        let key = DeviceSigningKey::from_bytes(&[0x31; 32]);
        let packet = key.sign_to_string(b"hello").unwrap();

        let (signer, payload) = verify_and_extract(&packet).unwrap();
        assert_eq!(signer, key.verifying_key().unwrap());
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn registry_binds_keys_to_devices() {
        let laptop = DeviceSigningKey::from_bytes(&[1; 32]).verifying_key().unwrap();
        let phone = DeviceSigningKey::from_bytes(&[2; 32]).verifying_key().unwrap();
        let stranger = DeviceSigningKey::from_bytes(&[3; 32]).verifying_key().unwrap();

        let mut registry = StaticDeviceRegistry::new()
            .with_device(DeviceId::new("laptop"), laptop)
            .with_device(DeviceId::new("phone"), phone);

        assert_eq!(registry.device_for_key(&laptop), Some(DeviceId::new("laptop")));
        assert!(registry.is_known_device_key(&phone));
        assert!(!registry.is_known_device_key(&stranger));

        assert_eq!(registry.remove(&phone), Some(DeviceId::new("phone")));
        assert!(!registry.is_known_device_key(&phone));
    }

    #[test]
    fn debug_shows_only_public_key() {
        let key = DeviceSigningKey::from_bytes(&[0x31; 32]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains(&hex_key(&key.verifying_key().unwrap())));
        assert!(!rendered.contains(&hex::encode([0x31; 32])));
    }

    #[test]
    fn hex_key_renders_public_key_bytes() {
        let public = DeviceSigningKey::from_bytes(&[0x31; 32]).verifying_key().unwrap();
        let rendered = hex_key(&public);

        assert_eq!(rendered.len(), 64);
        assert_eq!(hex::decode(&rendered).unwrap(), public.to_bytes());
    }
}
