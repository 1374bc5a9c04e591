use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::quality::QualityGate;
use super::{requester, AppState};
use crate::models::{BatchResult, ExerciseKind, FrameResult, PoseInput, PoseValidation};
use crate::services::{ExerciseInfo, SequencePrediction};

#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    /// Pose in any supported encoding
    #[serde(default, alias = "pose_landmarks", alias = "landmarks")]
    pub pose: PoseInput,
    /// Expected exercise; a session's current exercise when omitted
    #[serde(alias = "expected_exercise")]
    pub exercise: Option<ExerciseKind>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub frames: Vec<PoseInput>,
    #[serde(alias = "expected_exercise")]
    pub exercise: Option<ExerciseKind>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub batch: BatchResult,
    /// Whether the batch passes the quality gate for saving
    pub save_worthy: bool,
}

#[derive(Debug, Deserialize)]
pub struct SequenceRequest {
    pub sequence_data: Vec<Vec<f64>>,
    pub model: Option<ExerciseKind>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default, alias = "pose_landmarks", alias = "landmarks")]
    pub pose: PoseInput,
}

pub fn detection_routes() -> Router<AppState> {
    Router::new()
        .route("/exercises", get(list_exercises))
        .route("/poses/validate", post(validate_pose))
        .route("/frames", post(process_frame))
        .route("/batches", post(process_batch))
        .route("/predictions", post(predict_sequence))
}

async fn list_exercises(State(state): State<AppState>) -> Json<Vec<ExerciseInfo>> {
    Json(state.detection.catalog())
}

async fn validate_pose(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Json<PoseValidation> {
    Json(state.detection.validate_pose(&request.pose))
}

async fn process_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FrameRequest>,
) -> Result<Json<FrameResult>, ApiError> {
    let result = state
        .detection
        .process_frame(
            &request.pose,
            request.exercise,
            request.session_id.as_deref(),
            requester(&headers).as_deref(),
        )
        .await?;
    Ok(Json(result))
}

async fn process_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    if request.frames.is_empty() {
        return Err(ApiError::BadRequest("frames must not be empty".to_string()));
    }

    let batch = state
        .detection
        .process_batch(
            &request.frames,
            request.exercise,
            request.session_id.as_deref(),
            requester(&headers).as_deref(),
        )
        .await?;
    let gate: QualityGate = state.quality_gate;

    Ok(Json(BatchResponse {
        save_worthy: gate.is_save_worthy(&batch.stats),
        batch,
    }))
}

async fn predict_sequence(
    State(state): State<AppState>,
    Json(request): Json<SequenceRequest>,
) -> Result<Json<SequencePrediction>, ApiError> {
    let prediction = state
        .detection
        .predict_sequence(request.sequence_data, request.model)
        .await?;
    Ok(Json(prediction))
}
