//! Server-side device key directory.
//!
//! The directory stores signed device EK records per user. It deliberately
//! returns expired records too; filtering is the client's job.
//!
//! # Endpoints
//!
//! - `POST user/device_ek` with `{sig, device_id}` (authenticated session)
//! - `GET user/device_eks` returning `{results: [{merkle_payload, sig}]}`,
//!   implicitly scoped to the authenticated user
//!
//! HTTP and session handling belong to implementations of [`KeyDirectory`].

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of one of the user's devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of `POST user/device_ek`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeviceEkRequest {
    /// Signed packet over the canonical metadata
    pub sig: String,
    /// Device that owns the key
    pub device_id: DeviceId,
}

/// One record returned by `GET user/device_eks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEkElement {
    /// Server's Merkle payload for the record (informational, not trusted)
    pub merkle_payload: String,
    /// Signed packet over the canonical metadata
    pub sig: String,
}

/// Body returned by `GET user/device_eks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEksResponse {
    /// Records in server order
    pub results: Vec<DeviceEkElement>,
}

impl DeviceEksResponse {
    /// Parse a JSON response body.
    pub fn from_json(body: &[u8]) -> Result<Self, DirectoryError> {
        serde_json::from_slice(body).map_err(|e| DirectoryError::BadResponse(e.to_string()))
    }

    /// Encode as a JSON response body.
    pub fn to_json(&self) -> Result<Vec<u8>, DirectoryError> {
        serde_json::to_vec(self).map_err(|e| DirectoryError::BadResponse(e.to_string()))
    }
}

/// Directory request failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Network or session failure; the request may or may not have reached
    /// the server
    #[error("transport error: {0}")]
    Transport(String),

    /// Server refused the request
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// Response body could not be parsed
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// Client for the server-side device key directory.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Post a signed record for `device_id` (`POST user/device_ek`).
    async fn post_device_ek(&self, request: PostDeviceEkRequest) -> Result<(), DirectoryError>;

    /// Fetch all device EK records of the authenticated user
    /// (`GET user/device_eks`).
    async fn fetch_device_eks(&self) -> Result<DeviceEksResponse, DirectoryError>;
}

#[async_trait]
impl<T: KeyDirectory + ?Sized> KeyDirectory for Arc<T> {
    async fn post_device_ek(&self, request: PostDeviceEkRequest) -> Result<(), DirectoryError> {
        (**self).post_device_ek(request).await
    }

    async fn fetch_device_eks(&self) -> Result<DeviceEksResponse, DirectoryError> {
        (**self).fetch_device_eks().await
    }
}
