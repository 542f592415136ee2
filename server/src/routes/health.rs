//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Attribute used as the identity key for snapshots
    pub identity_field: String,
    /// Number of datasets with a live projection
    pub projections: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        identity_field: state.config.identity_field.clone(),
        projections: state
            .projections
            .iter()
            .filter(|entry| entry.value().is_some())
            .count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Geofold Server"
}
