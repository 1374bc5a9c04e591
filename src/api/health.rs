use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use super::AppState;
use crate::services::ClassifierHealth;

pub async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "rep-tracker",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Probe the external classifier
pub async fn ml_health(State(state): State<AppState>) -> (StatusCode, Json<ClassifierHealth>) {
    let health = state.detection.ml_health().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
