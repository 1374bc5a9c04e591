use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::exercise::ExerciseKind;

/// Named body metrics derived from a pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleMetric {
    ElbowAngle,
    BackAngle,
    HipAlignment,
    ShoulderStability,
    CoreEngagement,
    ArmExtension,
    HipHinge,
    WristAlignment,
    ShoulderRetraction,
    BackStraightness,
}

impl AngleMetric {
    pub const ALL: [AngleMetric; 10] = [
        AngleMetric::ElbowAngle,
        AngleMetric::BackAngle,
        AngleMetric::HipAlignment,
        AngleMetric::ShoulderStability,
        AngleMetric::CoreEngagement,
        AngleMetric::ArmExtension,
        AngleMetric::HipHinge,
        AngleMetric::WristAlignment,
        AngleMetric::ShoulderRetraction,
        AngleMetric::BackStraightness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AngleMetric::ElbowAngle => "elbow_angle",
            AngleMetric::BackAngle => "back_angle",
            AngleMetric::HipAlignment => "hip_alignment",
            AngleMetric::ShoulderStability => "shoulder_stability",
            AngleMetric::CoreEngagement => "core_engagement",
            AngleMetric::ArmExtension => "arm_extension",
            AngleMetric::HipHinge => "hip_hinge",
            AngleMetric::WristAlignment => "wrist_alignment",
            AngleMetric::ShoulderRetraction => "shoulder_retraction",
            AngleMetric::BackStraightness => "back_straightness",
        }
    }

    /// Sentence-case label, e.g. "Elbow angle"
    pub fn label(&self) -> String {
        let spaced = self.as_str().replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => spaced,
        }
    }
}

impl fmt::Display for AngleMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric values derived from one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AngleSet(BTreeMap<AngleMetric, f64>);

impl AngleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: AngleMetric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn insert(&mut self, metric: AngleMetric, value: f64) {
        self.0.insert(metric, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (AngleMetric, f64)> + '_ {
        self.0.iter().map(|(metric, value)| (*metric, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn all_finite(&self) -> bool {
        self.0.values().all(|value| value.is_finite())
    }
}

impl FromIterator<(AngleMetric, f64)> for AngleSet {
    fn from_iter<I: IntoIterator<Item = (AngleMetric, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Acceptable range for one metric of one exercise
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormRule {
    pub min: f64,
    pub max: f64,
    pub ideal: f64,
    /// Penalty factor applied to the form score when the rule fails (0-1]
    pub severity: f64,
}

impl FormRule {
    pub fn new(min: f64, max: f64, ideal: f64, severity: f64) -> Self {
        Self { min, max, ideal, severity }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// A failed form rule, ready to show to the athlete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormIssue {
    pub rule_name: AngleMetric,
    pub message: String,
    pub actual: f64,
    pub expected_range: String,
    pub severity: f64,
    pub difference: f64,
}

/// Outcome of checking one frame against an exercise's rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormCheck {
    pub is_correct: bool,
    pub score: f64,
    pub issues: Vec<FormIssue>,
}

impl FormCheck {
    pub fn perfect() -> Self {
        Self {
            is_correct: true,
            score: 1.0,
            issues: Vec::new(),
        }
    }
}

/// Whether a prediction came from the classifier or the fallback policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Fallback,
}

/// Exercise label and confidence for one classified window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub exercise_detected: ExerciseKind,
    pub confidence: f64,
    pub is_correct_exercise: bool,
    pub source: PredictionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Prediction {
    pub fn is_fallback(&self) -> bool {
        self.source == PredictionSource::Fallback
    }
}

/// Position within one repetition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepPhase {
    #[default]
    Rest,
    Down,
    Up,
}

/// What the rep state machine did with one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepUpdate {
    pub rep_completed: bool,
    pub phase: RepPhase,
    pub previous_phase: RepPhase,
    pub total_reps: u32,
    pub motion_intensity: f64,
}

impl RepUpdate {
    pub fn state_changed(&self) -> bool {
        self.phase != self.previous_phase
    }
}

/// Output for one analyzed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub success: bool,
    pub predicted_exercise: ExerciseKind,
    pub confidence: f64,
    pub is_correct_exercise: bool,
    pub form_issues: Vec<FormIssue>,
    pub form_score: f64,
    pub rep_completed: bool,
    pub current_phase: RepPhase,
    pub total_reps: u32,
    pub confidence_score: f64,
    pub feedback_text: String,
    pub prediction_source: PredictionSource,
    pub motion_intensity: f64,
    pub landmarks_count: usize,
    #[serde(default)]
    pub angles: AngleSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FrameResult {
    /// Result for a frame with no landmarks at all
    pub fn no_pose(expected: ExerciseKind, phase: RepPhase, total_reps: u32) -> Self {
        Self {
            success: false,
            predicted_exercise: expected,
            confidence: 0.0,
            is_correct_exercise: false,
            form_issues: Vec::new(),
            form_score: 0.0,
            rep_completed: false,
            current_phase: phase,
            total_reps,
            confidence_score: 0.0,
            feedback_text: "No pose detected".to_string(),
            prediction_source: PredictionSource::Fallback,
            motion_intensity: 0.0,
            landmarks_count: 0,
            angles: AngleSet::new(),
            note: None,
            error: Some("No pose landmarks detected".to_string()),
            recommendation: Some("Ensure camera can see full body".to_string()),
            session_note: None,
            timestamp: Utc::now(),
        }
    }

    /// Safe result when analysis itself broke down
    pub fn internal_failure(expected: ExerciseKind, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            predicted_exercise: expected,
            confidence: 0.6,
            is_correct_exercise: true,
            form_issues: Vec::new(),
            form_score: 0.0,
            rep_completed: false,
            current_phase: RepPhase::Rest,
            total_reps: 0,
            confidence_score: 0.0,
            feedback_text: "Keep going...".to_string(),
            prediction_source: PredictionSource::Fallback,
            motion_intensity: 0.0,
            landmarks_count: 0,
            angles: AngleSet::new(),
            note: Some("fallback".to_string()),
            error: Some(reason.into()),
            recommendation: None,
            session_note: None,
            timestamp: Utc::now(),
        }
    }

    pub fn has_correct_form(&self) -> bool {
        self.form_issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_labels() {
        assert_eq!(AngleMetric::ElbowAngle.label(), "Elbow angle");
        assert_eq!(AngleMetric::ShoulderRetraction.label(), "Shoulder retraction");
    }

    #[test]
    fn test_angle_set_serializes_as_named_map() {
        let angles: AngleSet = [(AngleMetric::HipHinge, 30.0)].into_iter().collect();
        let json = serde_json::to_value(&angles).unwrap();

        assert_eq!(json, serde_json::json!({"hip_hinge": 30.0}));
    }

    #[test]
    fn test_rule_bounds_are_inclusive() {
        let rule = FormRule::new(80.0, 120.0, 90.0, 0.3);

        assert!(rule.contains(80.0));
        assert!(rule.contains(120.0));
        assert!(!rule.contains(120.1));
    }

    #[test]
    fn test_no_pose_result_carries_recommendation() {
        let result = FrameResult::no_pose(ExerciseKind::Pushup, RepPhase::Down, 4);

        assert!(!result.success);
        assert_eq!(result.total_reps, 4);
        assert_eq!(result.recommendation.as_deref(), Some("Ensure camera can see full body"));
    }
}
