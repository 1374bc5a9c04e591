use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::services::{ClassifierError, SessionError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::Session(SessionError::NotFound(_)) => (StatusCode::NOT_FOUND, "Session not found"),
            ApiError::Session(SessionError::Forbidden(_)) => (StatusCode::FORBIDDEN, "Access denied"),
            ApiError::Session(SessionError::AlreadyExists(_)) => (StatusCode::CONFLICT, "Session already exists"),
            ApiError::Session(SessionError::Completed(_)) => (StatusCode::CONFLICT, "Session already completed"),
            ApiError::Session(SessionError::InvalidId(_)) => (StatusCode::BAD_REQUEST, "Invalid session id"),
            ApiError::Session(SessionError::Storage(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "Session storage error"),
            ApiError::Classifier(ClassifierError::InvalidRequest(_)) => (StatusCode::BAD_REQUEST, "Invalid prediction request"),
            ApiError::Classifier(_) => (StatusCode::BAD_GATEWAY, "Classifier unavailable"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
        };

        if status.is_server_error() {
            error!("{}: {}", error_message, self);
        }

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
