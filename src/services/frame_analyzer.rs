/// Frame Analyzer
///
/// Runs one frame through the pipeline:
/// normalize -> classify -> angles -> form rules -> rep state -> blend.
///
/// The work is split in two halves so callers can keep session locks short:
/// [`FrameAnalyzer::assess`] does everything that needs no session state
/// (including the classifier call); [`FrameAnalyzer::finish`] turns an
/// assessment plus a rep update into the final [`FrameResult`].
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::error;

use super::angle_estimator::AngleEstimator;
use super::classifier_gateway::ClassifierGateway;
use super::form_rules::FormRuleEngine;
use super::pose_normalizer::PoseNormalizer;
use super::rep_counter::{motion_intensity, temporal_motion_intensity};
use crate::models::{
    round_to, AngleSet, ExerciseKind, FeatureVector, FormCheck, FrameResult, PoseInput,
    Prediction, RepPhase, RepTracker, RepUpdate,
};

/// Weight of the classifier confidence in the blended score
const PREDICTION_WEIGHT: f64 = 0.7;
/// Weight of the form score in the blended score
const FORM_WEIGHT: f64 = 0.3;

/// A normalized frame ready for analysis
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub features: FeatureVector,
    pub landmarks_count: usize,
    pub captured_at: DateTime<Utc>,
}

/// Everything about a frame that does not depend on rep state
#[derive(Debug, Clone)]
pub struct FrameAssessment {
    pub frame: PreparedFrame,
    pub prediction: Prediction,
    pub angles: AngleSet,
    pub form: FormCheck,
    pub motion_intensity: f64,
}

pub struct FrameAnalyzer {
    normalizer: PoseNormalizer,
    estimator: Arc<dyn AngleEstimator>,
    rules: FormRuleEngine,
    gateway: ClassifierGateway,
    motion_gain: f64,
}

impl FrameAnalyzer {
    pub fn new(
        estimator: Arc<dyn AngleEstimator>,
        rules: FormRuleEngine,
        gateway: ClassifierGateway,
    ) -> Self {
        Self {
            normalizer: PoseNormalizer::new(),
            estimator,
            rules,
            gateway,
            motion_gain: 10.0,
        }
    }

    /// Scale applied to frame-to-frame landmark displacement
    pub fn with_motion_gain(mut self, gain: f64) -> Self {
        self.motion_gain = gain.max(0.0);
        self
    }

    pub fn normalizer(&self) -> &PoseNormalizer {
        &self.normalizer
    }

    pub fn rules(&self) -> &FormRuleEngine {
        &self.rules
    }

    pub fn gateway(&self) -> &ClassifierGateway {
        &self.gateway
    }

    /// Frames kept as history, excluding the current one. At least one so
    /// motion can always be measured against the previous frame.
    pub fn history_len(&self) -> usize {
        self.gateway.window_size().saturating_sub(1).max(1)
    }

    /// Normalize a pose. `None` when no landmarks were supplied at all.
    pub fn prepare(&self, input: &PoseInput, captured_at: DateTime<Utc>) -> Option<PreparedFrame> {
        if input.is_empty() {
            return None;
        }
        Some(PreparedFrame {
            features: self.normalizer.normalize(input, captured_at),
            landmarks_count: input.landmarks().len(),
            captured_at,
        })
    }

    /// Classify and score a frame given the frames that preceded it (oldest first)
    pub async fn assess(
        &self,
        frame: PreparedFrame,
        history: &[FeatureVector],
        expected: ExerciseKind,
    ) -> FrameAssessment {
        let window = build_window(history, &frame.features, self.gateway.window_size());
        let prediction = self.gateway.classify(window, expected).await;

        let angles = self.estimator.estimate(&frame.features, expected);
        let form = self.rules.check(&angles, expected);
        let motion_intensity = match history.last() {
            Some(previous) => temporal_motion_intensity(&frame.features, previous, self.motion_gain),
            None => motion_intensity(&frame.features),
        };

        FrameAssessment {
            frame,
            prediction,
            angles,
            form,
            motion_intensity,
        }
    }

    /// Build the result for an assessed frame after the rep state machine ran
    pub fn finish(&self, assessment: FrameAssessment, rep: RepUpdate, expected: ExerciseKind) -> FrameResult {
        let FrameAssessment {
            frame,
            prediction,
            angles,
            form,
            motion_intensity,
        } = assessment;

        let confidence_score =
            round_to(PREDICTION_WEIGHT * prediction.confidence + FORM_WEIGHT * form.score, 2);
        if !angles.all_finite() || !confidence_score.is_finite() {
            error!("Frame analysis produced non-finite values for {}", expected);
            let mut failed = FrameResult::internal_failure(expected, "Frame analysis failed");
            failed.current_phase = rep.phase;
            failed.total_reps = rep.total_reps;
            return failed;
        }

        let feedback_text = feedback_text(expected, &prediction, &form, &rep);

        FrameResult {
            success: true,
            predicted_exercise: prediction.exercise_detected,
            confidence: prediction.confidence,
            is_correct_exercise: prediction.is_correct_exercise,
            form_issues: form.issues,
            form_score: round_to(form.score, 4),
            rep_completed: rep.rep_completed,
            current_phase: rep.phase,
            total_reps: rep.total_reps,
            confidence_score,
            feedback_text,
            prediction_source: prediction.source,
            motion_intensity,
            landmarks_count: frame.landmarks_count,
            angles,
            note: prediction.note,
            error: None,
            recommendation: None,
            session_note: None,
            timestamp: frame.captured_at,
        }
    }

    /// Analyze one frame end to end against a caller-owned rep tracker
    pub async fn analyze(
        &self,
        input: &PoseInput,
        expected: ExerciseKind,
        tracker: &mut RepTracker,
        history: &[FeatureVector],
    ) -> FrameResult {
        let Some(frame) = self.prepare(input, Utc::now()) else {
            return FrameResult::no_pose(expected, tracker.phase, tracker.rep_count);
        };

        let assessment = self.assess(frame, history, expected).await;
        let rep = tracker.advance(expected, &assessment.angles, assessment.motion_intensity);
        self.finish(assessment, rep, expected)
    }
}

/// Last `size` frames ending with `current`, padded at the front by
/// repeating the oldest available frame
pub fn build_window(history: &[FeatureVector], current: &FeatureVector, size: usize) -> Vec<FeatureVector> {
    let size = size.max(1);
    let keep = history.len().min(size - 1);
    let mut frames: Vec<FeatureVector> = history[history.len() - keep..].to_vec();
    frames.push(current.clone());

    let oldest = frames[0].clone();
    let mut window = vec![oldest; size - frames.len()];
    window.extend(frames);
    window
}

fn feedback_text(
    expected: ExerciseKind,
    prediction: &Prediction,
    form: &FormCheck,
    rep: &RepUpdate,
) -> String {
    if !prediction.is_correct_exercise {
        return format!(
            "Wrong movement detected. Perform a proper {}.",
            expected.display_name()
        );
    }
    if let Some(issue) = form.issues.first() {
        return issue.message.clone();
    }
    if rep.rep_completed {
        return format!("Rep {} completed!", rep.total_reps);
    }

    match (rep.phase, expected) {
        (RepPhase::Down, ExerciseKind::Pushup) => "Lower your chest towards the floor".to_string(),
        (RepPhase::Up, ExerciseKind::Pushup) => "Push back up".to_string(),
        (RepPhase::Down, ExerciseKind::ShoulderPress) => "Lower the weight to shoulder height".to_string(),
        (RepPhase::Up, ExerciseKind::ShoulderPress) => "Press overhead".to_string(),
        (RepPhase::Down, ExerciseKind::TBarRow) => "Extend your arms with control".to_string(),
        (RepPhase::Up, ExerciseKind::TBarRow) => "Pull the bar to your chest".to_string(),
        (RepPhase::Rest, _) => "Good form! Keep going...".to_string(),
    }
}
