use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::analysis::{AngleMetric, FrameResult};
use super::exercise::ExerciseKind;

/// How often one form rule failed within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFrequency {
    pub issue: AngleMetric,
    pub count: usize,
    /// Share of all batch frames, e.g. "12.5%"
    pub frequency: String,
    pub frequency_percent: f64,
}

/// Aggregate statistics over an ordered run of frame results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_frames: usize,
    pub successful_frames: usize,
    pub failed_frames: usize,
    pub success_rate: f64,
    /// Over successful frames only
    pub correct_exercise_rate: f64,
    /// Over successful frames only
    pub correct_form_rate: f64,
    /// Highest cumulative rep count seen, never a sum
    pub total_reps_detected: u32,
    /// Reps whose completion happened inside this batch
    pub reps_completed_in_batch: u32,
    pub average_confidence: f64,
    pub form_issues_summary: Vec<IssueFrequency>,
}

/// Output of one processed batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub exercise: ExerciseKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub stats: BatchStats,
    pub frame_results: Vec<FrameResult>,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_note: Option<String>,
}
