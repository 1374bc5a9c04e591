use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;

use super::errors::ApiError;
use super::{requester, AppState};
use crate::models::{ActiveSession, ExerciseKind, SessionReport, SessionSummary, SwitchOutcome};
use crate::services::{CleanupReport, StartSession};

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndRequest {
    #[serde(default)]
    pub auto_save: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub exercise: ExerciseKind,
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_session).get(active_sessions))
        .route("/cleanup", post(cleanup_sessions))
        .route("/:id", get(session_status))
        .route("/:id/end", post(end_session))
        .route("/:id/switch", post(switch_exercise))
}

async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<StartSession>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    if request.user_id.is_none() {
        request.user_id = requester(&headers);
    }
    let summary = state.detection.start_session(request).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn active_sessions(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Result<Json<Vec<ActiveSession>>, ApiError> {
    let sessions = state.detection.active_sessions(query.user_id.as_deref()).await?;
    Ok(Json(sessions))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionReport>, ApiError> {
    let report = state
        .detection
        .session_status(&id, requester(&headers).as_deref())
        .await?;
    Ok(Json(report))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    request: Option<Json<EndRequest>>,
) -> Result<Json<SessionSummary>, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let summary = state
        .detection
        .end_session(&id, requester(&headers).as_deref(), request.auto_save, request.notes)
        .await?;
    Ok(Json(summary))
}

async fn switch_exercise(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SwitchRequest>,
) -> Result<Json<SwitchOutcome>, ApiError> {
    let outcome = state
        .detection
        .switch_exercise(&id, requester(&headers).as_deref(), request.exercise)
        .await?;
    Ok(Json(outcome))
}

async fn cleanup_sessions(State(state): State<AppState>) -> Result<Json<CleanupReport>, ApiError> {
    let report = state.detection.cleanup_expired(Utc::now()).await?;
    Ok(Json(report))
}
