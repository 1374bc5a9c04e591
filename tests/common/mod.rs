// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use rep_tracker::models::{ExerciseKind, Landmark, PoseInput, LANDMARK_COUNT};
use rep_tracker::services::{
    ClassifierError, DetectionService, ExercisePredictor, FormRuleEngine, FormRuleSet,
    GatewaySettings, GeometricAngleEstimator, InMemorySessionStore, PredictionRequest,
    PredictionResponse, SessionSettings, SessionStore, StoreError,
};

/// Answers with the requested exercise and records window lengths
#[derive(Default)]
pub struct EchoPredictor {
    pub seen_lengths: Mutex<Vec<usize>>,
}

#[async_trait]
impl ExercisePredictor for EchoPredictor {
    async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError> {
        if let Ok(mut seen) = self.seen_lengths.lock() {
            seen.push(request.sequence_data.len());
        }
        Ok(PredictionResponse::label(request.model.unwrap_or_default(), 0.9))
    }

    fn describe(&self) -> String {
        "echo".to_string()
    }
}

/// Always answers with one exercise
pub struct FixedPredictor(pub ExerciseKind);

#[async_trait]
impl ExercisePredictor for FixedPredictor {
    async fn predict(&self, _request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError> {
        Ok(PredictionResponse::label(self.0, 0.85))
    }

    fn describe(&self) -> String {
        format!("fixed:{}", self.0)
    }
}

/// Never answers within any reasonable timeout
pub struct StalledPredictor;

#[async_trait]
impl ExercisePredictor for StalledPredictor {
    async fn predict(&self, _request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(ClassifierError::Unavailable("stalled".to_string()))
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}

/// Signals when a prediction starts and holds it until released
#[derive(Default)]
pub struct GatedPredictor {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl ExercisePredictor for GatedPredictor {
    async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(PredictionResponse::label(request.model.unwrap_or_default(), 0.9))
    }

    fn describe(&self) -> String {
        "gated".to_string()
    }
}

/// In-memory store whose reads take a while
pub struct SlowStore {
    inner: InMemorySessionStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemorySessionStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl SessionStore for SlowStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn put(&self, id: &str, state: &Value) -> Result<(), StoreError> {
        self.inner.put(id, state).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list().await
    }

    async fn mtime(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.mtime(id).await
    }

    fn describe(&self) -> String {
        "slow".to_string()
    }
}

pub fn service_with(predictor: Arc<dyn ExercisePredictor>) -> DetectionService {
    service_with_store(predictor, Arc::new(InMemorySessionStore::new()))
}

pub fn service_with_store(predictor: Arc<dyn ExercisePredictor>, store: Arc<dyn SessionStore>) -> DetectionService {
    DetectionService::assemble(
        predictor,
        Arc::new(GeometricAngleEstimator::new()),
        FormRuleEngine::new(Arc::new(FormRuleSet::reference())),
        GatewaySettings {
            frame_timeout: Duration::from_millis(100),
            sequence_timeout: Duration::from_millis(200),
            window_size: 20,
        },
        store,
        SessionSettings::default(),
        10.0,
    )
}

pub fn service() -> DetectionService {
    service_with(Arc::new(EchoPredictor::default()))
}

/// Side-view arm position: shoulder, elbow and wrist of both arms
#[derive(Debug, Clone, Copy)]
pub struct ArmPose {
    pub shoulder: (f64, f64),
    pub elbow: (f64, f64),
    pub wrist: (f64, f64),
    pub nose: (f64, f64),
}

impl ArmPose {
    pub fn landmarks(&self) -> Vec<Landmark> {
        let point = |(x, y): (f64, f64)| Landmark::new(x, y, 0.0, 0.9);
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 0.9); LANDMARK_COUNT];
        landmarks[0] = point(self.nose);
        for index in [11, 12] {
            landmarks[index] = point(self.shoulder);
        }
        for index in [13, 14] {
            landmarks[index] = point(self.elbow);
        }
        for index in [15, 16] {
            landmarks[index] = point(self.wrist);
        }
        for index in [23, 24] {
            landmarks[index] = point((0.70, 0.52));
        }
        landmarks
    }

    pub fn input(&self) -> PoseInput {
        PoseInput::from(self.landmarks())
    }

    pub fn json(&self) -> Value {
        Value::Array(
            self.landmarks()
                .iter()
                .map(|l| json!({"x": l.x, "y": l.y, "z": l.z, "visibility": l.visibility}))
                .collect(),
        )
    }
}

/// Arms locked out (elbow 180)
pub const PUSHUP_TOP: ArmPose = ArmPose {
    shoulder: (0.40, 0.50),
    elbow: (0.40, 0.62),
    wrist: (0.40, 0.74),
    nose: (0.30, 0.50),
};

/// Chest lowered (elbow about 48)
pub const PUSHUP_BOTTOM: ArmPose = ArmPose {
    shoulder: (0.40, 0.65),
    elbow: (0.30, 0.70),
    wrist: (0.40, 0.74),
    nose: (0.30, 0.65),
};

/// Weight overhead (arm extension 180)
pub const PRESS_UP: ArmPose = ArmPose {
    shoulder: (0.40, 0.40),
    elbow: (0.40, 0.28),
    wrist: (0.40, 0.16),
    nose: (0.35, 0.35),
};

/// Weight at shoulder height (arm extension about 74)
pub const PRESS_LOW: ArmPose = ArmPose {
    shoulder: (0.40, 0.40),
    elbow: (0.30, 0.42),
    wrist: (0.31, 0.30),
    nose: (0.35, 0.35),
};

/// Arms hanging (elbow 180)
pub const ROW_EXTENDED: ArmPose = ArmPose {
    shoulder: (0.40, 0.40),
    elbow: (0.40, 0.55),
    wrist: (0.40, 0.70),
    nose: (0.30, 0.38),
};

/// Bar pulled in (elbow about 68)
pub const ROW_PULLED: ArmPose = ArmPose {
    shoulder: (0.40, 0.40),
    elbow: (0.50, 0.45),
    wrist: (0.42, 0.52),
    nose: (0.30, 0.38),
};

/// Frames performing `reps` full repetitions of `exercise`: a resting
/// frame, then (move, return, hold) per rep
pub fn rep_script(exercise: ExerciseKind, reps: usize) -> Vec<PoseInput> {
    let (rest, moved) = match exercise {
        ExerciseKind::Pushup => (PUSHUP_TOP, PUSHUP_BOTTOM),
        ExerciseKind::ShoulderPress => (PRESS_UP, PRESS_LOW),
        ExerciseKind::TBarRow => (ROW_PULLED, ROW_EXTENDED),
    };

    let mut frames = vec![rest.input()];
    for _ in 0..reps {
        frames.push(moved.input());
        frames.push(rest.input());
        frames.push(rest.input());
    }
    frames
}

pub async fn reps_for(service: &DetectionService, session_id: &str, exercise: ExerciseKind) -> u32 {
    let report = service
        .session_status(session_id, None)
        .await
        .expect("session should exist");
    report
        .stats
        .exercises
        .iter()
        .find(|totals| totals.exercise == exercise)
        .map(|totals| totals.reps)
        .unwrap_or(0)
}

pub async fn feed(
    service: &DetectionService,
    session_id: &str,
    exercise: ExerciseKind,
    frames: &[PoseInput],
) {
    for frame in frames {
        service
            .process_frame(frame, Some(exercise), Some(session_id), None)
            .await
            .expect("frame should be accepted");
    }
}
