//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub root: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.root().is_dir() { "ok" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        root: state.root().display().to_string(),
    })
}
