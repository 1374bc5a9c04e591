/// Classifier Gateway
///
/// Wraps the out-of-process exercise classifier:
/// - every call carries a hard timeout
/// - per-frame classification never fails, it degrades to a fixed fallback
/// - sequence prediction and health checks report failures to the caller
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    round_to, ExerciseKind, FeatureVector, Prediction, PredictionSource, FEATURE_COUNT,
};

/// Confidence reported when the classifier could not be used
pub const FALLBACK_CONFIDENCE: f64 = 0.7;
/// Marker attached to fallback predictions
pub const FALLBACK_NOTE: &str = "fallback";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
    #[error("Classifier failed: {0}")]
    Failed(String),
    #[error("Classifier rejected the request: {0}")]
    Rejected(String),
    #[error("Malformed classifier output: {0}")]
    Malformed(String),
    #[error("Invalid prediction request: {0}")]
    InvalidRequest(String),
}

/// Request sent to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub sequence_data: Vec<FeatureVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ExerciseKind>,
}

/// Confidence as either one value or one value per timestep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfidenceValue {
    Scalar(f64),
    Series(Vec<f64>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    #[serde(default)]
    pub average: Option<f64>,
}

/// Raw classifier response. The label may arrive as `prediction` or
/// `model`; the confidence in several encodings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub prediction: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub confidence: Option<ConfidenceValue>,
    #[serde(default)]
    pub average_confidence: Option<f64>,
    #[serde(default)]
    pub confidence_stats: Option<ConfidenceStats>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PredictionResponse {
    /// Successful response with a single confidence value
    pub fn label(exercise: ExerciseKind, confidence: f64) -> Self {
        Self {
            success: Some(true),
            prediction: Some(exercise.to_string()),
            confidence: Some(ConfidenceValue::Scalar(confidence)),
            ..Self::default()
        }
    }

    /// Validated label and confidence
    pub fn interpret(&self) -> Result<(ExerciseKind, f64), ClassifierError> {
        let success = self.success.unwrap_or(self.error.is_none());
        if !success {
            return Err(ClassifierError::Rejected(
                self.error
                    .clone()
                    .unwrap_or_else(|| "prediction unsuccessful".to_string()),
            ));
        }

        let label = self
            .prediction
            .as_deref()
            .or(self.model.as_deref())
            .ok_or_else(|| ClassifierError::Malformed("missing label".to_string()))?;
        let exercise = label
            .parse::<ExerciseKind>()
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        let confidence = self
            .confidence_value()
            .ok_or_else(|| ClassifierError::Malformed("missing confidence".to_string()))?;
        if !confidence.is_finite() {
            return Err(ClassifierError::Malformed(format!(
                "confidence is not a number: {}",
                confidence
            )));
        }

        Ok((exercise, confidence.clamp(0.0, 1.0)))
    }

    fn confidence_value(&self) -> Option<f64> {
        match &self.confidence {
            Some(ConfidenceValue::Scalar(value)) => Some(*value),
            Some(ConfidenceValue::Series(values)) if !values.is_empty() => {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
            _ => self
                .average_confidence
                .or_else(|| self.confidence_stats.as_ref().and_then(|s| s.average)),
        }
    }

    fn per_step_confidence(&self) -> Option<Vec<f64>> {
        match &self.confidence {
            Some(ConfidenceValue::Series(values)) => Some(values.clone()),
            _ => None,
        }
    }
}

/// Transport to the external classifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExercisePredictor: Send + Sync {
    async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError>;

    /// Short description for logs and health reports
    fn describe(&self) -> String;
}

/// Timeouts and window size for classifier calls
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub frame_timeout: Duration,
    pub sequence_timeout: Duration,
    pub window_size: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(3),
            sequence_timeout: Duration::from_secs(30),
            window_size: 20,
        }
    }
}

/// Outcome of an explicit sequence prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePrediction {
    pub exercise: ExerciseKind,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_step_confidence: Option<Vec<f64>>,
    pub sequence_length: usize,
    pub feature_count: usize,
}

/// Classifier health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierHealth {
    pub healthy: bool,
    pub predictor: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ClassifierGateway {
    predictor: Arc<dyn ExercisePredictor>,
    settings: GatewaySettings,
}

impl ClassifierGateway {
    pub fn new(predictor: Arc<dyn ExercisePredictor>, settings: GatewaySettings) -> Self {
        Self { predictor, settings }
    }

    pub fn window_size(&self) -> usize {
        self.settings.window_size.max(1)
    }

    /// Classify a window of frames. Falls back instead of failing.
    pub async fn classify(&self, window: Vec<FeatureVector>, expected: ExerciseKind) -> Prediction {
        let request = PredictionRequest {
            sequence_data: window,
            model: Some(expected),
        };

        let outcome = self
            .call(&request, self.settings.frame_timeout)
            .await
            .and_then(|response| response.interpret());

        match outcome {
            Ok((exercise, confidence)) => {
                debug!("Classifier predicted {} ({:.2})", exercise, confidence);
                Prediction {
                    exercise_detected: exercise,
                    confidence,
                    is_correct_exercise: exercise == expected,
                    source: PredictionSource::Model,
                    note: None,
                }
            }
            Err(e) => {
                warn!("Classifier degraded, using fallback for {}: {}", expected, e);
                Self::fallback(expected)
            }
        }
    }

    /// Fixed prediction used when the classifier cannot answer
    pub fn fallback(expected: ExerciseKind) -> Prediction {
        Prediction {
            exercise_detected: expected,
            confidence: FALLBACK_CONFIDENCE,
            is_correct_exercise: true,
            source: PredictionSource::Fallback,
            note: Some(FALLBACK_NOTE.to_string()),
        }
    }

    /// Predict over a caller-built sequence, adjusting every row to the
    /// feature width first. Errors are returned, not masked.
    pub async fn predict_sequence(
        &self,
        rows: Vec<Vec<f64>>,
        model: Option<ExerciseKind>,
    ) -> Result<SequencePrediction, ClassifierError> {
        if rows.is_empty() {
            return Err(ClassifierError::InvalidRequest(
                "sequence_data must contain at least one timestep".to_string(),
            ));
        }

        let request = PredictionRequest {
            sequence_data: rows.into_iter().map(FeatureVector::from_values).collect(),
            model,
        };
        let response = self.call(&request, self.settings.sequence_timeout).await?;
        let (exercise, confidence) = response.interpret()?;

        Ok(SequencePrediction {
            exercise,
            confidence: round_to(confidence, 4),
            per_step_confidence: response.per_step_confidence(),
            sequence_length: request.sequence_data.len(),
            feature_count: FEATURE_COUNT,
        })
    }

    /// Probe the classifier with a neutral window
    pub async fn health(&self) -> ClassifierHealth {
        let probe = PredictionRequest {
            sequence_data: vec![FeatureVector::from_values(Vec::new()); self.window_size()],
            model: Some(ExerciseKind::default()),
        };

        let started = Instant::now();
        let outcome = self
            .call(&probe, self.settings.frame_timeout)
            .await
            .and_then(|response| response.interpret());
        let latency_ms = started.elapsed().as_millis() as u64;

        ClassifierHealth {
            healthy: outcome.is_ok(),
            predictor: self.predictor.describe(),
            latency_ms,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    async fn call(
        &self,
        request: &PredictionRequest,
        limit: Duration,
    ) -> Result<PredictionResponse, ClassifierError> {
        match tokio::time::timeout(limit, self.predictor.predict(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(limit)),
        }
    }
}
