use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::detection::detection_routes;
use super::health::{health_check, ml_health};
use super::sessions::session_routes;
use super::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/ml-health", get(ml_health))
        .nest("/api", detection_routes())
        .nest("/api/sessions", session_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
