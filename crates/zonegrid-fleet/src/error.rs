//! Fleet client error types.

use thiserror::Error;

/// Result type alias for fleet calls.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors returned by fleet calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    /// The fleet rejected the bearer secret (misconfiguration, not outage).
    #[error("fleet rejected credentials: {0}")]
    Unauthorized(String),

    /// The container does not exist upstream.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Timeout, connection failure or 5xx.
    #[error("fleet unavailable: {0}")]
    ServiceUnavailable(String),

    /// The fleet answered 2xx with a body we could not decode.
    #[error("invalid fleet response: {0}")]
    InvalidResponse(String),
}

impl FleetError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound(_))
    }
}
