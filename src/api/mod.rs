// API routes and handlers

pub mod detection;
pub mod errors;
pub mod health;
pub mod quality;
pub mod routes;
pub mod sessions;

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::services::DetectionService;

pub use errors::ApiError;
pub use quality::QualityGate;

/// Header carrying the requesting user's id
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub detection: Arc<DetectionService>,
    pub quality_gate: QualityGate,
}

impl AppState {
    pub fn new(detection: Arc<DetectionService>, quality_gate: QualityGate) -> Self {
        Self {
            detection,
            quality_gate,
        }
    }
}

/// Requesting user, if the caller identified one
pub(crate) fn requester(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
