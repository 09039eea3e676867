//! In-process fleet used for local development and tests.
//!
//! Behaves like the real fleet API from the caller's point of view: it
//! assigns container uuids, reports containers as `QUEUED` until told
//! otherwise, and answers `NotFound` for unknown uuids. Call counters let
//! tests assert how many side effects an operation caused.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use zonegrid_state::ZoneState;

use crate::error::{FleetError, FleetResult};
use crate::types::{ContainerStatus, CreateContainerRequest};
use crate::FleetClient;

const FIRST_PORT: u16 = 7000;

/// A fleet that lives in memory.
pub struct InMemoryFleet {
    containers: RwLock<BTreeMap<String, ContainerStatus>>,
    /// When set, every call fails with this error.
    failure: RwLock<Option<FleetError>>,
    next_port: AtomicU16,
    create_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl Default for InMemoryFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            failure: RwLock::new(None),
            next_port: AtomicU16::new(FIRST_PORT),
            create_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail with `error` (`None` restores service).
    pub async fn set_failure(&self, error: Option<FleetError>) {
        *self.failure.write().await = error;
    }

    /// Simulate a fleet-side state change.
    pub async fn set_state(&self, uuid: &str, state: ZoneState) -> bool {
        let mut containers = self.containers.write().await;
        match containers.get_mut(uuid) {
            Some(container) => {
                container.state = Some(state.as_str().to_string());
                true
            }
            None => false,
        }
    }

    /// Add a container out-of-band (as a fleet operator would).
    pub async fn insert(&self, container: ContainerStatus) {
        if let Some(uuid) = container.uuid.clone() {
            self.containers.write().await.insert(uuid, container);
        }
    }

    /// Remove a container out-of-band, without counting a delete call.
    pub async fn remove(&self, uuid: &str) -> Option<ContainerStatus> {
        self.containers.write().await.remove(uuid)
    }

    pub async fn len(&self) -> usize {
        self.containers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.containers.read().await.is_empty()
    }

    /// Number of `create` calls received, including failed ones.
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls received, including failed ones.
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    async fn check_failure(&self) -> FleetResult<()> {
        match self.failure.read().await.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FleetClient for InMemoryFleet {
    async fn list_all(&self) -> FleetResult<Vec<ContainerStatus>> {
        self.check_failure().await?;
        Ok(self.containers.read().await.values().cloned().collect())
    }

    async fn create(&self, request: &CreateContainerRequest) -> FleetResult<ContainerStatus> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure().await?;

        let uuid = uuid::Uuid::new_v4().to_string();
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let container = ContainerStatus {
            uuid: Some(uuid.clone()),
            server_id: Some(format!("local-{port}")),
            space_id: Some(request.space_id.clone()),
            space_version: request.space_version.clone(),
            space_mode: Some(request.space_mode.as_str().to_string()),
            ip_address: Some("127.0.0.1".to_string()),
            port: Some(i64::from(port)),
            state: Some(ZoneState::Queued.as_str().to_string()),
            gd_server_version: Some(request.gd_server_version.clone()),
        };
        self.containers.write().await.insert(uuid.clone(), container.clone());
        debug!(%uuid, space = %request.space_id, "in-memory container created");
        Ok(container)
    }

    async fn get(&self, uuid: &str) -> FleetResult<ContainerStatus> {
        self.check_failure().await?;
        self.containers
            .read()
            .await
            .get(uuid)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(uuid.to_string()))
    }

    async fn delete(&self, uuid: &str) -> FleetResult<ContainerStatus> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure().await?;
        self.containers
            .write()
            .await
            .remove(uuid)
            .ok_or_else(|| FleetError::NotFound(uuid.to_string()))
    }
}
