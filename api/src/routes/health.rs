use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct RootResponse {
    pub message: String,
}

/// Liveness greeting
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is up", body = RootResponse)),
    tag = "system"
)]
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Hello, World!".to_string(),
    })
}

/// Health check. All state is in-process, so a response means healthy.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
