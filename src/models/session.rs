use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::analysis::{FrameResult, RepPhase, RepUpdate};
use super::batch::BatchResult;
use super::exercise::ExerciseKind;
use super::landmark::FeatureVector;

/// How the session is being fed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Realtime,
    Batch,
    Hybrid,
}

/// Session lifecycle: created on start, active after the first update,
/// completed once ended. Completed sessions accept no more updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    Active,
    Completed,
}

/// Rep state machine for one (session, exercise) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepTracker {
    pub phase: RepPhase,
    pub rep_count: u32,
}

/// Counters for one exercise inside a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseProgress {
    pub tracker: RepTracker,
    pub sets: u32,
}

impl ExerciseProgress {
    pub fn reps(&self) -> u32 {
        self.tracker.rep_count
    }
}

/// Compact record of one analyzed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame_number: u64,
    pub exercise: ExerciseKind,
    pub success: bool,
    pub is_correct_exercise: bool,
    pub form_score: f64,
    pub confidence_score: f64,
    pub rep_completed: bool,
    pub total_reps: u32,
    pub timestamp: DateTime<Utc>,
}

impl FrameSummary {
    pub fn from_result(frame_number: u64, exercise: ExerciseKind, result: &FrameResult) -> Self {
        Self {
            frame_number,
            exercise,
            success: result.success,
            is_correct_exercise: result.is_correct_exercise,
            form_score: result.form_score,
            confidence_score: result.confidence_score,
            rep_completed: result.rep_completed,
            total_reps: result.total_reps,
            timestamp: result.timestamp,
        }
    }
}

/// Compact record of one processed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub exercise: ExerciseKind,
    pub frame_count: usize,
    pub success_rate: f64,
    pub reps_detected: u32,
    pub timestamp: DateTime<Utc>,
}

impl BatchSummary {
    pub fn from_result(result: &BatchResult) -> Self {
        Self {
            batch_id: result.batch_id.clone(),
            exercise: result.exercise,
            frame_count: result.stats.total_frames,
            success_rate: result.stats.success_rate,
            reps_detected: result.stats.total_reps_detected,
            timestamp: result.processed_at,
        }
    }
}

/// Audit entry written on every exercise switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSwitch {
    pub from: ExerciseKind,
    pub to: ExerciseKind,
    pub timestamp: DateTime<Utc>,
}

/// Cumulative state of one tracking session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: Option<String>,
    pub workout_id: Option<String>,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub exercises: Vec<ExerciseKind>,
    pub current_exercise: ExerciseKind,
    pub progress: BTreeMap<ExerciseKind, ExerciseProgress>,
    pub frame_count: u64,
    pub batches_processed: u64,
    pub total_batch_frames: u64,
    pub successful_frames: u64,
    pub correct_form_frames: u64,
    pub confidence_sum: f64,
    pub recent_frames: VecDeque<FrameSummary>,
    pub recent_batches: VecDeque<BatchSummary>,
    pub exercise_switches: Vec<ExerciseSwitch>,
    pub final_notes: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Last frames seen, oldest first, fed to the classifier
    #[serde(skip)]
    pub window: VecDeque<FeatureVector>,
    /// Set once the session is deleted; late holders of the handle must not write it back
    #[serde(skip)]
    pub removed: bool,
}

impl SessionState {
    pub fn new(
        session_id: String,
        user_id: Option<String>,
        workout_id: Option<String>,
        session_type: SessionType,
        exercises: Vec<ExerciseKind>,
    ) -> Self {
        let now = Utc::now();
        let current_exercise = exercises.first().copied().unwrap_or_default();
        let progress = exercises
            .iter()
            .map(|exercise| (*exercise, ExerciseProgress::default()))
            .collect();

        Self {
            session_id,
            user_id,
            workout_id,
            session_type,
            status: SessionStatus::Created,
            exercises,
            current_exercise,
            progress,
            frame_count: 0,
            batches_processed: 0,
            total_batch_frames: 0,
            successful_frames: 0,
            correct_form_frames: 0,
            confidence_sum: 0.0,
            recent_frames: VecDeque::new(),
            recent_batches: VecDeque::new(),
            exercise_switches: Vec::new(),
            final_notes: None,
            started_at: now,
            updated_at: now,
            ended_at: None,
            window: VecDeque::new(),
            removed: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Counters for an exercise, created on first use
    pub fn progress_mut(&mut self, exercise: ExerciseKind) -> &mut ExerciseProgress {
        if !self.exercises.contains(&exercise) {
            self.exercises.push(exercise);
        }
        self.progress.entry(exercise).or_default()
    }

    pub fn reps_for(&self, exercise: ExerciseKind) -> u32 {
        self.progress.get(&exercise).map(ExerciseProgress::reps).unwrap_or(0)
    }

    pub fn sets_for(&self, exercise: ExerciseKind) -> u32 {
        self.progress.get(&exercise).map(|p| p.sets).unwrap_or(0)
    }

    pub fn total_reps(&self) -> u32 {
        self.progress.values().map(ExerciseProgress::reps).sum()
    }

    pub fn total_sets(&self) -> u32 {
        self.progress.values().map(|p| p.sets).sum()
    }

    pub fn tracker(&self, exercise: ExerciseKind) -> RepTracker {
        self.progress
            .get(&exercise)
            .map(|p| p.tracker)
            .unwrap_or_default()
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).num_seconds().max(0)
    }

    /// Most recently buffered frame, if any
    pub fn last_frame(&self) -> Option<&FeatureVector> {
        self.window.back()
    }

    /// Buffer a frame for the classifier window, keeping at most `capacity`
    pub fn push_window(&mut self, features: FeatureVector, capacity: usize) {
        self.window.push_back(features);
        while self.window.len() > capacity.max(1) {
            self.window.pop_front();
        }
    }

    /// Apply a rep update for `exercise`, rolling a set every `reps_per_set` reps
    pub fn apply_rep_update(&mut self, exercise: ExerciseKind, tracker: RepTracker, update: &RepUpdate, reps_per_set: u32) {
        let progress = self.progress_mut(exercise);
        progress.tracker = tracker;
        if update.rep_completed && reps_per_set > 0 && tracker.rep_count % reps_per_set == 0 {
            progress.sets += 1;
        }
    }

    /// Record a real-time frame in the running aggregates and history
    pub fn record_frame(&mut self, exercise: ExerciseKind, result: &FrameResult, history_limit: usize) {
        self.frame_count += 1;
        if result.success {
            self.successful_frames += 1;
            self.confidence_sum += result.confidence_score;
            if result.has_correct_form() {
                self.correct_form_frames += 1;
            }
        }
        push_bounded(
            &mut self.recent_frames,
            FrameSummary::from_result(self.frame_count, exercise, result),
            history_limit,
        );
        self.touch();
    }

    /// Record a processed batch
    pub fn record_batch(&mut self, result: &BatchResult, history_limit: usize) {
        self.batches_processed += 1;
        self.total_batch_frames += result.stats.total_frames as u64;
        push_bounded(&mut self.recent_batches, BatchSummary::from_result(result), history_limit);
        self.touch();
    }

    /// Mark the session as being fed and bump its update time
    pub fn touch(&mut self) {
        if self.status == SessionStatus::Created {
            self.status = SessionStatus::Active;
        }
        self.updated_at = Utc::now();
    }

    pub fn average_confidence(&self) -> f64 {
        if self.successful_frames == 0 {
            return 0.0;
        }
        round_to(self.confidence_sum / self.successful_frames as f64, 2)
    }

    pub fn form_accuracy(&self) -> f64 {
        if self.successful_frames == 0 {
            return 0.0;
        }
        round_to(self.correct_form_frames as f64 / self.successful_frames as f64 * 100.0, 1)
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, limit: usize) {
    buffer.push_back(item);
    while buffer.len() > limit {
        buffer.pop_front();
    }
}

/// Round to a fixed number of decimals
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Progress of one exercise as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseTotals {
    pub exercise: ExerciseKind,
    pub display_name: String,
    pub reps: u32,
    pub sets: u32,
    pub phase: RepPhase,
}

/// Running statistics of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub elapsed_seconds: i64,
    pub frame_count: u64,
    pub frames_per_second: f64,
    pub batches_processed: u64,
    pub total_frames_processed: u64,
    pub total_reps: u32,
    pub total_sets: u32,
    pub current_exercise: ExerciseKind,
    pub exercises: Vec<ExerciseTotals>,
    pub average_confidence: f64,
    pub form_accuracy: f64,
}

impl SessionStats {
    pub fn from_state(state: &SessionState, now: DateTime<Utc>) -> Self {
        let elapsed_seconds = state.elapsed_seconds(now);
        let frames_per_second = if elapsed_seconds > 0 {
            round_to(state.frame_count as f64 / elapsed_seconds as f64, 2)
        } else {
            0.0
        };

        Self {
            elapsed_seconds,
            frame_count: state.frame_count,
            frames_per_second,
            batches_processed: state.batches_processed,
            total_frames_processed: state.frame_count + state.total_batch_frames,
            total_reps: state.total_reps(),
            total_sets: state.total_sets(),
            current_exercise: state.current_exercise,
            exercises: state
                .progress
                .iter()
                .map(|(exercise, progress)| ExerciseTotals {
                    exercise: *exercise,
                    display_name: exercise.display_name().to_string(),
                    reps: progress.reps(),
                    sets: progress.sets,
                    phase: progress.tracker.phase,
                })
                .collect(),
            average_confidence: state.average_confidence(),
            form_accuracy: state.form_accuracy(),
        }
    }
}

/// Identity and headline numbers of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Option<String>,
    pub workout_id: Option<String>,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub exercises: Vec<ExerciseKind>,
    pub current_exercise: ExerciseKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stats: SessionStats,
    /// Workout records for the caller to persist when auto-save was asked for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub saved_records: Vec<WorkoutRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_notes: Option<String>,
}

impl SessionSummary {
    pub fn from_state(state: &SessionState, now: DateTime<Utc>) -> Self {
        Self {
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            workout_id: state.workout_id.clone(),
            session_type: state.session_type,
            status: state.status,
            exercises: state.exercises.clone(),
            current_exercise: state.current_exercise,
            started_at: state.started_at,
            ended_at: state.ended_at,
            stats: SessionStats::from_state(state, now),
            saved_records: Vec::new(),
            final_notes: state.final_notes.clone(),
        }
    }
}

/// Per-exercise record produced when a session ends with auto-save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub session_id: String,
    pub workout_id: Option<String>,
    pub exercise: ExerciseKind,
    pub reps: u32,
    pub sets: u32,
    pub duration_seconds: i64,
}

/// Full status report for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub stats: SessionStats,
    pub recent_frames: Vec<FrameSummary>,
    pub recent_batches: Vec<BatchSummary>,
    pub exercise_switches: Vec<ExerciseSwitch>,
}

/// Result of switching the active exercise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub previous: ExerciseKind,
    pub current: ExerciseKind,
    pub switched_at: DateTime<Utc>,
    pub total_switches: usize,
    /// Reps already counted for the new exercise
    pub current_reps: u32,
}

/// Entry in the active sessions listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub current_exercise: ExerciseKind,
    pub frame_count: u64,
    pub total_reps: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SessionState> for ActiveSession {
    fn from(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            status: state.status,
            current_exercise: state.current_exercise,
            frame_count: state.frame_count,
            total_reps: state.total_reps(),
            started_at: state.started_at,
            updated_at: state.updated_at,
        }
    }
}
