//! zonegrid-fleet: typed client for the external container fleet.
//!
//! The fleet runs one container per zone and is the source of truth for
//! runtime state (`state`, `ip_address`, `port`). This crate holds no state
//! of its own: it is the network boundary of ZoneGrid.
//!
//! # Surface
//!
//! | Method | Path | Call |
//! |---|---|---|
//! | GET | `/containers` | [`FleetClient::list_all`] |
//! | POST | `/containers` | [`FleetClient::create`] |
//! | GET | `/containers/:uuid` | [`FleetClient::get`] |
//! | DELETE | `/containers/:uuid` | [`FleetClient::delete`] |
//!
//! Every request carries the shared bearer secret and a bounded timeout.
//! There is no retry at this layer: a timeout, network error or 5xx fails
//! fast with [`FleetError::ServiceUnavailable`].
//!
//! [`InMemoryFleet`] implements the same trait without a network, for local
//! development and tests.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use client::{FleetConfig, HttpFleetClient};
pub use error::{FleetError, FleetResult};
pub use memory::InMemoryFleet;
pub use types::{ContainerStatus, CreateContainerRequest};

/// Operations ZoneGrid needs from the container fleet.
#[async_trait]
pub trait FleetClient: Send + Sync {
    /// Full snapshot of every container the fleet currently runs.
    async fn list_all(&self) -> FleetResult<Vec<ContainerStatus>>;

    /// Ask the fleet to start a container.
    async fn create(&self, request: &CreateContainerRequest) -> FleetResult<ContainerStatus>;

    /// Current status of one container.
    async fn get(&self, uuid: &str) -> FleetResult<ContainerStatus>;

    /// Stop and remove a container. Fails with [`FleetError::NotFound`] if
    /// the fleet no longer knows it.
    async fn delete(&self, uuid: &str) -> FleetResult<ContainerStatus>;
}
