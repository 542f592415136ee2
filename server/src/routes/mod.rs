//! HTTP route definitions.

mod datasets;
mod health;

pub use datasets::FeatureBody;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(datasets::routes())
}
