//! Orchestration error taxonomy.

use thiserror::Error;

use zonegrid_fleet::FleetError;
use zonegrid_state::StateError;

/// Errors surfaced by zone operations.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// Malformed request, rejected before any external call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Space, zone or access is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The zone has no free slot. A rejection, not a fault.
    #[error("zone {zone_id} is full ({occupancy}/{max_users})")]
    CapacityExceeded {
        zone_id: String,
        occupancy: usize,
        max_users: u32,
    },

    /// The fleet rejected our bearer secret.
    #[error("fleet rejected credentials: {0}")]
    Unauthorized(String),

    /// Any other fleet failure; callers retry with backoff.
    #[error("fleet unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type ZoneResult<T> = Result<T, ZoneError>;

impl From<FleetError> for ZoneError {
    fn from(e: FleetError) -> Self {
        match e {
            FleetError::Unauthorized(msg) => ZoneError::Unauthorized(msg),
            FleetError::NotFound(msg) => {
                ZoneError::ServiceUnavailable(format!("container not found: {msg}"))
            }
            FleetError::ServiceUnavailable(msg) => ZoneError::ServiceUnavailable(msg),
            FleetError::InvalidResponse(msg) => {
                ZoneError::ServiceUnavailable(format!("invalid fleet response: {msg}"))
            }
        }
    }
}
