//! Simulated server-side device key directory.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use ephemera_client::{
    DeviceEkElement, DeviceEksResponse, DeviceId, DirectoryError, KeyDirectory,
    PostDeviceEkRequest,
};
use tracing::debug;

/// How the directory misbehaves on the next requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryFault {
    /// Requests behave normally
    #[default]
    None,
    /// Posts fail before the server stores anything
    RejectPosts,
    /// Posts are stored, but the client sees a transport error (a timeout
    /// after the server committed)
    LoseAcks,
    /// Fetches fail
    FailFetches,
}

/// In-memory directory for one user's devices.
///
/// Requests round-trip through their JSON wire shape. Records are returned
/// in insertion order, expired ones included.
#[derive(Clone, Default)]
pub struct SimDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

#[derive(Default)]
struct DirectoryState {
    records: Vec<(DeviceId, String)>,
    fault: DirectoryFault,
    latency: Duration,
}

impl SimDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the fault mode for subsequent requests.
    pub fn set_fault(&self, fault: DirectoryFault) {
        self.lock().fault = fault;
    }

    /// Delay every request by `latency` (tokio time).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Store a raw record, bypassing the post endpoint (e.g. a forgery).
    pub fn inject(&self, device_id: DeviceId, sig: impl Into<String>) {
        self.lock().records.push((device_id, sig.into()));
    }

    /// Records stored for `device_id`, in insertion order.
    pub fn records_for(&self, device_id: &DeviceId) -> Vec<String> {
        self.lock()
            .records
            .iter()
            .filter(|(owner, _)| owner == device_id)
            .map(|(_, sig)| sig.clone())
            .collect()
    }

    /// Total number of stored records.
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl KeyDirectory for SimDirectory {
    async fn post_device_ek(&self, request: PostDeviceEkRequest) -> Result<(), DirectoryError> {
        self.simulate_latency().await;

        let body =
            serde_json::to_vec(&request).map_err(|e| DirectoryError::BadResponse(e.to_string()))?;
        let received: PostDeviceEkRequest = serde_json::from_slice(&body)
            .map_err(|e| DirectoryError::Rejected(e.to_string()))?;

        let mut state = self.lock();
        match state.fault {
            DirectoryFault::RejectPosts => {
                return Err(DirectoryError::Transport("connection refused".to_string()));
            },
            DirectoryFault::LoseAcks => {
                state.records.push((received.device_id, received.sig));
                return Err(DirectoryError::Transport("timed out awaiting response".to_string()));
            },
            DirectoryFault::None | DirectoryFault::FailFetches => {},
        }

        debug!(device = %received.device_id, "directory stored device EK");
        state.records.push((received.device_id, received.sig));
        Ok(())
    }

    async fn fetch_device_eks(&self) -> Result<DeviceEksResponse, DirectoryError> {
        self.simulate_latency().await;

        let body = {
            let state = self.lock();
            if state.fault == DirectoryFault::FailFetches {
                return Err(DirectoryError::Transport("503 service unavailable".to_string()));
            }

            DeviceEksResponse {
                results: state
                    .records
                    .iter()
                    .enumerate()
                    .map(|(index, (_, sig))| DeviceEkElement {
                        merkle_payload: format!("{{\"leaf\":{index}}}"),
                        sig: sig.clone(),
                    })
                    .collect(),
            }
            .to_json()?
        };

        DeviceEksResponse::from_json(&body)
    }
}
