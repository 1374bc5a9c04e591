/// Detection Service
///
/// Request surface over the pipeline: single frames, batches, sequence
/// predictions and the session lifecycle. Frame and batch calls may run
/// without a session; with one, their rep state and history go through the
/// [`SessionTracker`].
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::angle_estimator::AngleEstimator;
use super::batch_aggregator::{build_result, BatchAggregator};
use super::classifier_gateway::{
    ClassifierError, ClassifierGateway, ClassifierHealth, ExercisePredictor, GatewaySettings,
    SequencePrediction,
};
use super::errors::SessionError;
use super::form_rules::{FormRuleEngine, FormRuleSet, RuleEntry};
use super::frame_analyzer::FrameAnalyzer;
use super::session_store::{InMemorySessionStore, JsonFileSessionStore, SessionStore};
use super::session_tracker::{
    advance_session, CleanupReport, SessionSettings, SessionTracker, StartSession,
};
use crate::config::{load_form_rules, AppConfig};
use crate::models::{
    ActiveSession, BatchResult, ExerciseKind, FeatureVector, FormGuidance, FrameResult, PoseInput,
    PoseValidation, RepTracker, SessionReport, SessionSummary, SwitchOutcome,
};

/// Catalog entry for one supported exercise
#[derive(Debug, Clone, Serialize)]
pub struct ExerciseInfo {
    pub exercise: ExerciseKind,
    pub display_name: &'static str,
    pub guidance: Vec<FormGuidance>,
    pub rules: Vec<RuleEntry>,
}

pub struct DetectionService {
    analyzer: Arc<FrameAnalyzer>,
    batches: BatchAggregator,
    sessions: Arc<SessionTracker>,
}

impl DetectionService {
    pub fn new(analyzer: Arc<FrameAnalyzer>, sessions: Arc<SessionTracker>) -> Self {
        Self {
            batches: BatchAggregator::new(Arc::clone(&analyzer)),
            analyzer,
            sessions,
        }
    }

    /// Assemble the pipeline from its parts
    pub fn assemble(
        predictor: Arc<dyn ExercisePredictor>,
        estimator: Arc<dyn AngleEstimator>,
        rules: FormRuleEngine,
        gateway_settings: GatewaySettings,
        store: Arc<dyn SessionStore>,
        session_settings: SessionSettings,
        motion_gain: f64,
    ) -> Self {
        let gateway = ClassifierGateway::new(predictor, gateway_settings);
        let analyzer = FrameAnalyzer::new(estimator, rules, gateway).with_motion_gain(motion_gain);
        let sessions = SessionTracker::new(store, session_settings);
        Self::new(Arc::new(analyzer), Arc::new(sessions))
    }

    /// Build the service described by the configuration
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let rules = load_form_rules(config.form_rules_path.as_deref())?;
        let engine = FormRuleEngine::new(Arc::new(rules))
            .with_far_from_ideal_ratio(config.far_from_ideal_ratio);

        let store: Arc<dyn SessionStore> = match &config.session_store_dir {
            Some(dir) => Arc::new(
                JsonFileSessionStore::open(dir.clone())
                    .await
                    .with_context(|| format!("Failed to open session store at {}", dir.display()))?,
            ),
            None => Arc::new(InMemorySessionStore::new()),
        };

        let predictor = config.build_predictor()?;
        info!(
            "Detection pipeline: predictor={}, angles={:?}, store={}",
            predictor.describe(),
            config.angle_model,
            store.describe()
        );

        Ok(Self::assemble(
            predictor,
            Arc::from(config.angle_model.build()),
            engine,
            config.gateway_settings(),
            store,
            config.session_settings()?,
            config.motion_gain,
        ))
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    /// Analyze one frame, standalone or as part of a session
    pub async fn process_frame(
        &self,
        input: &PoseInput,
        expected: Option<ExerciseKind>,
        session_id: Option<&str>,
        requester: Option<&str>,
    ) -> Result<FrameResult, SessionError> {
        let Some(session_id) = session_id else {
            let mut tracker = RepTracker::default();
            let exercise = expected.unwrap_or_default();
            return Ok(self.analyzer.analyze(input, exercise, &mut tracker, &[]).await);
        };

        let context = self.sessions.begin(session_id, requester, expected).await?;
        let exercise = context.exercise;

        let Some(frame) = self.analyzer.prepare(input, Utc::now()) else {
            let outcome = self
                .sessions
                .update(session_id, |state, settings| {
                    let tracker = state.tracker(exercise);
                    let result = FrameResult::no_pose(exercise, tracker.phase, tracker.rep_count);
                    state.record_frame(exercise, &result, settings.history_limit);
                    result
                })
                .await;
            return settle(outcome, session_id, || {
                FrameResult::no_pose(exercise, context.tracker.phase, context.tracker.rep_count)
            })
            .map(|(result, note)| with_frame_note(result, note));
        };

        let assessment = self.analyzer.assess(frame, &context.history, exercise).await;
        let detached = assessment.clone();
        let analyzer = &self.analyzer;

        let outcome = self
            .sessions
            .update(session_id, move |state, settings| {
                let features = assessment.frame.features.clone();
                let update = advance_session(
                    state,
                    exercise,
                    &assessment.angles,
                    assessment.motion_intensity,
                    settings.reps_per_set,
                );
                let result = analyzer.finish(assessment, update, exercise);
                state.push_window(features, settings.window_size);
                state.record_frame(exercise, &result, settings.history_limit);
                result
            })
            .await;

        settle(outcome, session_id, || {
            let mut tracker = context.tracker;
            let update = tracker.advance(exercise, &detached.angles, detached.motion_intensity);
            self.analyzer.finish(detached, update, exercise)
        })
        .map(|(result, note)| with_frame_note(result, note))
    }

    /// Analyze an ordered batch of frames, standalone or as part of a session
    pub async fn process_batch(
        &self,
        inputs: &[PoseInput],
        expected: Option<ExerciseKind>,
        session_id: Option<&str>,
        requester: Option<&str>,
    ) -> Result<BatchResult, SessionError> {
        let Some(session_id) = session_id else {
            let mut tracker = RepTracker::default();
            return Ok(self
                .batches
                .process(inputs, expected.unwrap_or_default(), &mut tracker)
                .await);
        };

        let context = self.sessions.begin(session_id, requester, expected).await?;
        let exercise = context.exercise;
        let assessments = self.batches.assess_all(inputs, &context.history, exercise).await;
        let detached = assessments.clone();
        let batches = &self.batches;

        let outcome = self
            .sessions
            .update(session_id, move |state, settings| {
                let features: Vec<FeatureVector> = assessments
                    .iter()
                    .flatten()
                    .map(|assessment| assessment.frame.features.clone())
                    .collect();
                let start = state.tracker(exercise);
                let frames = batches.apply(assessments, exercise, start, |angles, motion| {
                    advance_session(state, exercise, angles, motion, settings.reps_per_set)
                });
                for frame in features {
                    state.push_window(frame, settings.window_size);
                }

                let result = build_result(exercise, Some(session_id.to_string()), frames);
                state.record_batch(&result, settings.history_limit);
                result
            })
            .await;

        settle(outcome, session_id, || {
            let mut tracker = context.tracker;
            let frames = self.batches.apply(detached, exercise, tracker, |angles, motion| {
                tracker.advance(exercise, angles, motion)
            });
            build_result(exercise, Some(session_id.to_string()), frames)
        })
        .map(|(mut result, note)| {
            result.session_note = note;
            result
        })
    }

    /// Predict over a caller-built sequence. Classifier errors are returned.
    pub async fn predict_sequence(
        &self,
        rows: Vec<Vec<f64>>,
        model: Option<ExerciseKind>,
    ) -> Result<SequencePrediction, ClassifierError> {
        self.analyzer.gateway().predict_sequence(rows, model).await
    }

    pub async fn ml_health(&self) -> ClassifierHealth {
        self.analyzer.gateway().health().await
    }

    pub fn validate_pose(&self, input: &PoseInput) -> PoseValidation {
        self.analyzer.normalizer().validate(input)
    }

    pub fn catalog(&self) -> Vec<ExerciseInfo> {
        let rules: &FormRuleSet = self.analyzer.rules().rules();
        ExerciseKind::ALL
            .iter()
            .map(|&exercise| ExerciseInfo {
                exercise,
                display_name: exercise.display_name(),
                guidance: exercise.guidance(),
                rules: rules.rules_for(exercise).to_vec(),
            })
            .collect()
    }

    pub async fn start_session(&self, request: StartSession) -> Result<SessionSummary, SessionError> {
        self.sessions.start(request).await
    }

    pub async fn end_session(
        &self,
        session_id: &str,
        requester: Option<&str>,
        auto_save: bool,
        notes: Option<String>,
    ) -> Result<SessionSummary, SessionError> {
        self.sessions.end(session_id, requester, auto_save, notes).await
    }

    pub async fn session_status(
        &self,
        session_id: &str,
        requester: Option<&str>,
    ) -> Result<SessionReport, SessionError> {
        self.sessions.status(session_id, requester).await
    }

    pub async fn switch_exercise(
        &self,
        session_id: &str,
        requester: Option<&str>,
        exercise: ExerciseKind,
    ) -> Result<SwitchOutcome, SessionError> {
        self.sessions.switch_exercise(session_id, requester, exercise).await
    }

    pub async fn active_sessions(&self, user_id: Option<&str>) -> Result<Vec<ActiveSession>, SessionError> {
        self.sessions.active_sessions(user_id).await
    }

    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport, SessionError> {
        self.sessions.cleanup_expired(now).await
    }
}

/// A session that disappeared or completed while its update was in flight
/// still yields a result, marked as not recorded. Notes from the update
/// itself (a failed save) are passed through.
fn settle<T>(
    outcome: Result<(T, Option<String>), SessionError>,
    session_id: &str,
    detached: impl FnOnce() -> T,
) -> Result<(T, Option<String>), SessionError> {
    match outcome {
        Ok(applied) => Ok(applied),
        Err(e @ (SessionError::NotFound(_) | SessionError::Completed(_))) => {
            warn!("Session {} changed during analysis: {}", session_id, e);
            Ok((detached(), Some(format!("{}; result was not recorded", e))))
        }
        Err(e) => Err(e),
    }
}

fn with_frame_note(mut result: FrameResult, note: Option<String>) -> FrameResult {
    result.session_note = note;
    result
}
