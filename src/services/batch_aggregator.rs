/// Batch Aggregator
///
/// Frames of a batch are assessed concurrently (bounded), then applied to the
/// rep state machine strictly in input order. Statistics are computed from
/// the ordered results.
use chrono::Utc;
use futures::stream::{self, StreamExt};
use statrs::statistics::Statistics;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::frame_analyzer::{FrameAnalyzer, FrameAssessment};
use crate::models::{
    round_to, AngleMetric, AngleSet, BatchResult, BatchStats, ExerciseKind, FeatureVector,
    FrameResult, IssueFrequency, PoseInput, RepTracker, RepUpdate,
};

/// Classifier calls in flight per batch
const MAX_PARALLEL_ASSESSMENTS: usize = 8;
const TOP_ISSUES: usize = 5;

pub struct BatchAggregator {
    analyzer: Arc<FrameAnalyzer>,
}

impl BatchAggregator {
    pub fn new(analyzer: Arc<FrameAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Assess every frame. `history` holds the frames seen before this batch,
    /// oldest first. `None` marks a frame without landmarks.
    pub async fn assess_all(
        &self,
        inputs: &[PoseInput],
        history: &[FeatureVector],
        expected: ExerciseKind,
    ) -> Vec<Option<FrameAssessment>> {
        let keep = self.analyzer.history_len();
        let captured_at = Utc::now();
        let mut rolling: Vec<FeatureVector> =
            history[history.len().saturating_sub(keep)..].to_vec();

        let mut jobs = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.analyzer.prepare(input, captured_at) {
                Some(frame) => {
                    let prior = rolling.clone();
                    rolling.push(frame.features.clone());
                    if rolling.len() > keep {
                        rolling.drain(..rolling.len() - keep);
                    }
                    jobs.push(Some((frame, prior)));
                }
                None => jobs.push(None),
            }
        }

        let analyzer = &self.analyzer;
        stream::iter(jobs)
            .map(|job| async move {
                match job {
                    Some((frame, prior)) => Some(analyzer.assess(frame, &prior, expected).await),
                    None => None,
                }
            })
            .buffered(MAX_PARALLEL_ASSESSMENTS)
            .collect()
            .await
    }

    /// Run assessed frames through `advance` in order. `start` is the rep
    /// state before the batch, reported for frames without a pose.
    pub fn apply<F>(
        &self,
        assessments: Vec<Option<FrameAssessment>>,
        expected: ExerciseKind,
        start: RepTracker,
        mut advance: F,
    ) -> Vec<FrameResult>
    where
        F: FnMut(&AngleSet, f64) -> RepUpdate,
    {
        let mut phase = start.phase;
        let mut total_reps = start.rep_count;
        let mut results = Vec::with_capacity(assessments.len());

        for assessment in assessments {
            let result = match assessment {
                Some(assessment) => {
                    let update = advance(&assessment.angles, assessment.motion_intensity);
                    phase = update.phase;
                    total_reps = update.total_reps;
                    self.analyzer.finish(assessment, update, expected)
                }
                None => FrameResult::no_pose(expected, phase, total_reps),
            };
            results.push(result);
        }
        results
    }

    /// Process a batch outside any session against a caller-owned tracker
    pub async fn process(
        &self,
        inputs: &[PoseInput],
        expected: ExerciseKind,
        tracker: &mut RepTracker,
    ) -> BatchResult {
        let assessments = self.assess_all(inputs, &[], expected).await;
        let start = *tracker;
        let frames = self.apply(assessments, expected, start, |angles, motion| {
            tracker.advance(expected, angles, motion)
        });
        build_result(expected, None, frames)
    }
}

/// Package ordered frame results as a batch
pub fn build_result(
    exercise: ExerciseKind,
    session_id: Option<String>,
    frame_results: Vec<FrameResult>,
) -> BatchResult {
    let stats = summarize(&frame_results);
    let batch_id = format!("batch_{}", Uuid::new_v4().simple());
    debug!(
        "Batch {} summarized: {} frames, {}% successful",
        batch_id, stats.total_frames, stats.success_rate
    );

    BatchResult {
        batch_id,
        exercise,
        session_id,
        stats,
        frame_results,
        processed_at: Utc::now(),
        session_note: None,
    }
}

/// Aggregate statistics over ordered frame results
pub fn summarize(frames: &[FrameResult]) -> BatchStats {
    let total_frames = frames.len();
    let successful: Vec<&FrameResult> = frames.iter().filter(|f| f.success).collect();
    let successful_frames = successful.len();

    let percent = |count: usize, of: usize| {
        if of == 0 {
            0.0
        } else {
            round_to(count as f64 / of as f64 * 100.0, 2)
        }
    };

    let correct_exercise = successful.iter().filter(|f| f.is_correct_exercise).count();
    let correct_form = successful.iter().filter(|f| f.has_correct_form()).count();

    let confidences: Vec<f64> = successful.iter().map(|f| f.confidence_score).collect();
    let average_confidence = if confidences.is_empty() {
        0.0
    } else {
        round_to(confidences.iter().mean(), 2)
    };

    BatchStats {
        total_frames,
        successful_frames,
        failed_frames: total_frames - successful_frames,
        success_rate: percent(successful_frames, total_frames),
        correct_exercise_rate: percent(correct_exercise, successful_frames),
        correct_form_rate: percent(correct_form, successful_frames),
        total_reps_detected: frames.iter().map(|f| f.total_reps).max().unwrap_or(0),
        reps_completed_in_batch: frames.iter().filter(|f| f.rep_completed).count() as u32,
        average_confidence,
        form_issues_summary: issue_frequencies(frames, TOP_ISSUES),
    }
}

/// Most frequent issues, ties kept in order of first appearance
fn issue_frequencies(frames: &[FrameResult], limit: usize) -> Vec<IssueFrequency> {
    let mut counts: Vec<(AngleMetric, usize)> = Vec::new();
    for frame in frames {
        for issue in &frame.form_issues {
            match counts.iter_mut().find(|(metric, _)| *metric == issue.rule_name) {
                Some((_, count)) => *count += 1,
                None => counts.push((issue.rule_name, 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    counts
        .into_iter()
        .take(limit)
        .map(|(issue, count)| {
            let frequency_percent = round_to(count as f64 / frames.len() as f64 * 100.0, 1);
            IssueFrequency {
                issue,
                count,
                frequency: format!("{}%", frequency_percent),
                frequency_percent,
            }
        })
        .collect()
}
