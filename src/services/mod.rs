// Detection pipeline services

pub mod angle_estimator;
pub mod batch_aggregator;
pub mod classifier_gateway;
pub mod cleanup_job;
pub mod detection_service;
pub mod errors;
pub mod form_rules;
pub mod frame_analyzer;
pub mod pose_normalizer;
pub mod predictors;
pub mod rep_counter;
pub mod session_store;
pub mod session_tracker;

pub use angle_estimator::{AngleEstimator, AngleModel, GeometricAngleEstimator, SyntheticAngleEstimator};
pub use batch_aggregator::{summarize, BatchAggregator};
pub use classifier_gateway::{
    ClassifierError, ClassifierGateway, ClassifierHealth, ExercisePredictor, GatewaySettings,
    PredictionRequest, PredictionResponse, SequencePrediction,
};
pub use cleanup_job::CleanupJob;
pub use detection_service::{DetectionService, ExerciseInfo};
pub use errors::{SessionError, StoreError};
pub use form_rules::{FormRuleEngine, FormRuleSet, RuleEntry, RuleTableError};
pub use frame_analyzer::{FrameAnalyzer, FrameAssessment, PreparedFrame};
pub use pose_normalizer::PoseNormalizer;
pub use predictors::{HttpPredictor, ProcessPredictor};
pub use rep_counter::{motion_intensity, temporal_motion_intensity, RepCycle};
pub use session_store::{InMemorySessionStore, JsonFileSessionStore, SessionStore};
pub use session_tracker::{CleanupReport, SessionSettings, SessionTracker, StartSession};
