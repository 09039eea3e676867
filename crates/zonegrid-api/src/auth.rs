//! Caller identity and the admin-secret guard.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::ApiState;
use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

/// The user on whose behalf a request is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing caller identity"))?;
        Ok(Self { id: id.to_string() })
    }
}

/// Reject requests that do not carry the configured admin secret.
pub async fn require_admin(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if state.admin_secret.is_empty() || !secrets_match(presented, &state.admin_secret) {
        warn!(uri = %request.uri(), "admin secret rejected");
        return ApiError::unauthorized("invalid admin secret").into_response();
    }
    next.run(request).await
}

/// Constant-time comparison of the presented secret against the configured one.
fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
