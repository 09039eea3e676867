//! zonegrid-api: REST API for ZoneGrid.
//!
//! Callers are identified by the `x-user-id` header, set by the gateway
//! that verified their token. Admin and server-to-server routes require the
//! shared `x-admin-secret` header.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/zone/join-build-server/:spaceId` | Join (or start) the space's BUILD zone |
//! | GET | `/zone/join-play-server/zone/:zoneId` | Join a PLAY zone by id |
//! | GET | `/zone/join-play-server/space/:spaceId` | Join a PLAY zone of the active version (`?createZoneIfDoesntExist=bool`) |
//! | POST | `/zone/create-play-server/:spaceVersionId` | Start a new PLAY zone |
//! | GET | `/zone/list-play-servers/:spaceVersionId` | List PLAY zones of a version |
//! | POST | `/zone/server-status` | Game-server status report (admin secret) |
//! | DELETE | `/zone/admin/stop-all` | Tear down every zone and container (admin) |
//! | PUT | `/zone/admin/spaces/:id` | Mirror a space record (admin) |
//! | PUT | `/zone/admin/space-versions/:id` | Mirror a space version record (admin) |
//! | GET | `/health` | Liveness |

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

use zonegrid_orchestrator::ZoneOrchestrator;
use zonegrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ZoneOrchestrator>,
    pub store: StateStore,
    /// Shared secret for admin routes. Empty disables them.
    pub admin_secret: String,
    /// Seconds a server may stay empty before it is torn down.
    pub idle_threshold_secs: u64,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let user_routes = Router::new()
        .route("/join-build-server/{space_id}", get(handlers::join_build_server))
        .route("/join-play-server/zone/{zone_id}", get(handlers::join_play_server_by_zone))
        .route("/join-play-server/space/{space_id}", get(handlers::join_play_server_by_space))
        .route("/create-play-server/{space_version_id}", post(handlers::create_play_server))
        .route("/list-play-servers/{space_version_id}", get(handlers::list_play_servers));

    let privileged_routes = Router::new()
        .route("/server-status", post(handlers::server_status))
        .route("/admin/stop-all", delete(handlers::stop_all))
        .route("/admin/spaces/{id}", put(handlers::put_space))
        .route("/admin/space-versions/{id}", put(handlers::put_space_version))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .nest("/zone", user_routes.merge(privileged_routes))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
