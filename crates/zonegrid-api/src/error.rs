//! Error → HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use zonegrid_orchestrator::ZoneError;
use zonegrid_state::StateError;

use crate::handlers::ApiResponse;

/// An error rendered as the standard JSON envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<ZoneError> for ApiError {
    fn from(e: ZoneError) -> Self {
        let status = match &e {
            ZoneError::Validation(_) => StatusCode::BAD_REQUEST,
            ZoneError::NotFound(_) => StatusCode::NOT_FOUND,
            ZoneError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            // Our fleet credentials were rejected; the caller did nothing wrong.
            ZoneError::Unauthorized(_) => StatusCode::BAD_GATEWAY,
            ZoneError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ZoneError::State(inner) => return Self::from_state(inner),
        };
        Self::new(status, e.to_string())
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        Self::from_state(&e)
    }
}

impl ApiError {
    fn from_state(e: &StateError) -> Self {
        match e {
            StateError::Invalid(msg) => Self::bad_request(msg.clone()),
            StateError::Conflict(msg) => Self::new(StatusCode::CONFLICT, msg.clone()),
            other => {
                error!(error = %other, "state store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::err(self.message))).into_response()
    }
}
