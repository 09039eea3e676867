//! REST API handlers.
//!
//! Each handler delegates to the orchestrator (or the store, for the space
//! mirror) and returns the standard JSON envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use zonegrid_orchestrator::ServerStatus;
use zonegrid_state::{Space, SpaceVersion};

use crate::ApiState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    pub fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Joins ──────────────────────────────────────────────────────

/// GET /zone/join-build-server/:spaceId
pub async fn join_build_server(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(space_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let zone = state.orchestrator.join_build(&user.id, &space_id).await?;
    Ok(ApiResponse::ok(zone))
}

/// GET /zone/join-play-server/zone/:zoneId
pub async fn join_play_server_by_zone(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(zone_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let zone = state
        .orchestrator
        .join_play_by_zone_id(&user.id, &zone_id)
        .await?;
    Ok(ApiResponse::ok(zone))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlayQuery {
    #[serde(default)]
    pub create_zone_if_doesnt_exist: bool,
}

/// GET /zone/join-play-server/space/:spaceId?createZoneIfDoesntExist=bool
pub async fn join_play_server_by_space(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(space_id): Path<String>,
    Query(query): Query<JoinPlayQuery>,
) -> ApiResult<impl IntoResponse> {
    let zone = state
        .orchestrator
        .join_play_by_space_id(&user.id, &space_id, query.create_zone_if_doesnt_exist)
        .await?;
    Ok(ApiResponse::ok(zone))
}

// ── PLAY servers ───────────────────────────────────────────────

/// POST /zone/create-play-server/:spaceVersionId
pub async fn create_play_server(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(space_version_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let zone = state
        .orchestrator
        .create_play_server(&user.id, &space_version_id)
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(zone)))
}

/// GET /zone/list-play-servers/:spaceVersionId
pub async fn list_play_servers(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(space_version_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let zones = state
        .orchestrator
        .list_play_servers(&user.id, &space_version_id)?;
    Ok(ApiResponse::ok(zones))
}

// ── Server-to-server ───────────────────────────────────────────

/// POST /zone/server-status
pub async fn server_status(
    State(state): State<ApiState>,
    Json(status): Json<ServerStatus>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .orchestrator
        .handle_server_status(&status, state.idle_threshold_secs)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

// ── Admin ──────────────────────────────────────────────────────

/// DELETE /zone/admin/stop-all
pub async fn stop_all(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    info!("admin stop-all requested");
    let report = state.orchestrator.stop_all().await?;
    Ok(ApiResponse::ok(report))
}

/// PUT /zone/admin/spaces/:id
pub async fn put_space(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(space): Json<Space>,
) -> ApiResult<impl IntoResponse> {
    if space.id != id {
        return Err(ApiError::bad_request(format!(
            "body id {:?} does not match path id {id:?}",
            space.id
        )));
    }
    state.store.put_space(&space)?;
    Ok(ApiResponse::ok(space))
}

/// PUT /zone/admin/space-versions/:id
pub async fn put_space_version(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(version): Json<SpaceVersion>,
) -> ApiResult<impl IntoResponse> {
    if version.id != id {
        return Err(ApiError::bad_request(format!(
            "body id {:?} does not match path id {id:?}",
            version.id
        )));
    }
    if state.store.get_space(&version.space)?.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("space {} is not mirrored", version.space),
        ));
    }
    state.store.put_space_version(&version)?;
    Ok(ApiResponse::ok(version))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
