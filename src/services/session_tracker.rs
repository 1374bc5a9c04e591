/// Session Tracker
///
/// Owns every live [`SessionState`]. Each session sits behind its own async
/// mutex, so updates to one session are serialized while different sessions
/// proceed independently. State is written through to a [`SessionStore`] and
/// rehydrated from it on first access.
///
/// Frame and batch updates are split around the classifier call: `begin`
/// copies what the analysis needs and releases the lock, `update` re-acquires
/// it to apply the results.
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::{SessionError, StoreError};
use super::session_store::{is_valid_key, SessionStore};
use crate::models::{
    ActiveSession, AngleSet, ExerciseKind, ExerciseSwitch, FeatureVector, RepTracker, RepUpdate,
    SessionReport, SessionState, SessionStats, SessionStatus, SessionSummary, SessionType,
    SwitchOutcome, WorkoutRecord,
};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Recent frame and batch summaries kept per session
    pub history_limit: usize,
    pub reps_per_set: u32,
    /// Frames kept per session for the classifier window
    pub window_size: usize,
    /// How long completed sessions are kept
    pub retention: Duration,
    /// How long an abandoned session may sit idle
    pub idle_expiry: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            reps_per_set: 10,
            window_size: 19,
            retention: Duration::hours(1),
            idle_expiry: Duration::hours(1),
        }
    }
}

/// Request to open a session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSession {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub workout_id: Option<String>,
    #[serde(default)]
    pub exercises: Vec<ExerciseKind>,
    #[serde(default)]
    pub session_type: SessionType,
}

/// What a frame or batch needs from its session before analysis
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub exercise: ExerciseKind,
    pub history: Vec<FeatureVector>,
    pub tracker: RepTracker,
}

/// Outcome of a cleanup sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub retained: usize,
}

/// Step the rep machine of `exercise` inside a session, rolling sets
pub fn advance_session(
    state: &mut SessionState,
    exercise: ExerciseKind,
    angles: &AngleSet,
    motion: f64,
    reps_per_set: u32,
) -> RepUpdate {
    let mut tracker = state.tracker(exercise);
    let update = tracker.advance(exercise, angles, motion);
    state.apply_rep_update(exercise, tracker, &update, reps_per_set);
    update
}

pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
    settings: SessionSettings,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SessionStore>, settings: SessionSettings) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Create a session in the `created` state
    pub async fn start(&self, request: StartSession) -> Result<SessionSummary, SessionError> {
        let session_id = match request.session_id {
            Some(id) if !is_valid_key(&id) => return Err(SessionError::InvalidId(id)),
            Some(id) => id,
            None => format!("session_{}", Uuid::new_v4().simple()),
        };

        let mut exercises = Vec::new();
        for exercise in request.exercises {
            if !exercises.contains(&exercise) {
                exercises.push(exercise);
            }
        }
        if exercises.is_empty() {
            exercises.push(ExerciseKind::default());
        }

        let state = SessionState::new(
            session_id.clone(),
            request.user_id,
            request.workout_id,
            request.session_type,
            exercises,
        );

        // Reserve the id before touching the store; readers of the entry wait
        // on the lock until the session is stored or rolled back
        let handle = Arc::new(Mutex::new(state));
        let mut state = Arc::clone(&handle).lock_owned().await;
        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyExists(session_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&handle));
            }
        }

        let stored = match self.store.get(&session_id).await {
            Ok(Some(_)) => Err(SessionError::AlreadyExists(session_id.clone())),
            Ok(None) => self.persist(&state).await.map_err(SessionError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            state.removed = true;
            self.sessions.remove_if(&session_id, |_, held| Arc::ptr_eq(held, &handle));
            return Err(e);
        }
        let summary = SessionSummary::from_state(&state, Utc::now());
        drop(state);

        info!(
            "Started {:?} session {} for {}",
            summary.session_type,
            session_id,
            summary.user_id.as_deref().unwrap_or("anonymous")
        );
        Ok(summary)
    }

    /// Snapshot the state a frame or batch needs before the classifier runs
    pub async fn begin(
        &self,
        session_id: &str,
        requester: Option<&str>,
        exercise: Option<ExerciseKind>,
    ) -> Result<UpdateContext, SessionError> {
        let handle = self.handle(session_id).await?;
        let state = handle.lock().await;
        ensure_live(&state)?;
        authorize(&state, requester)?;
        if state.is_completed() {
            return Err(SessionError::Completed(session_id.to_string()));
        }

        let exercise = exercise.unwrap_or(state.current_exercise);
        Ok(UpdateContext {
            exercise,
            history: state.window.iter().cloned().collect(),
            tracker: state.tracker(exercise),
        })
    }

    /// Apply a frame or batch result under the session lock.
    ///
    /// The update counts in memory even when it cannot be stored; the
    /// returned note then describes the storage failure.
    pub async fn update<F, R>(&self, session_id: &str, apply: F) -> Result<(R, Option<String>), SessionError>
    where
        F: FnOnce(&mut SessionState, &SessionSettings) -> R,
    {
        let handle = self.handle(session_id).await?;
        let mut state = handle.lock().await;
        ensure_live(&state)?;
        if state.is_completed() {
            return Err(SessionError::Completed(session_id.to_string()));
        }

        let outcome = apply(&mut *state, &self.settings);
        let note = match self.persist(&state).await {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to persist session {}: {}", session_id, e);
                Some(format!("Session state was not saved: {}", e))
            }
        };
        Ok((outcome, note))
    }

    /// Point the session at another exercise. Counters of every exercise are kept.
    pub async fn switch_exercise(
        &self,
        session_id: &str,
        requester: Option<&str>,
        exercise: ExerciseKind,
    ) -> Result<SwitchOutcome, SessionError> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.lock().await;
        ensure_live(&state)?;
        authorize(&state, requester)?;
        if state.is_completed() {
            return Err(SessionError::Completed(session_id.to_string()));
        }

        let previous = state.current_exercise;
        let switched_at = Utc::now();
        if previous != exercise {
            state.exercise_switches.push(ExerciseSwitch {
                from: previous,
                to: exercise,
                timestamp: switched_at,
            });
            // History of another exercise must not feed its classifier window
            state.window.clear();
        }
        state.progress_mut(exercise);
        state.current_exercise = exercise;
        state.touch();
        self.persist(&state).await?;

        info!("Session {} switched from {} to {}", session_id, previous, exercise);
        Ok(SwitchOutcome {
            previous,
            current: exercise,
            switched_at,
            total_switches: state.exercise_switches.len(),
            current_reps: state.reps_for(exercise),
        })
    }

    /// Complete a session and compute its final summary
    pub async fn end(
        &self,
        session_id: &str,
        requester: Option<&str>,
        auto_save: bool,
        notes: Option<String>,
    ) -> Result<SessionSummary, SessionError> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.lock().await;
        ensure_live(&state)?;
        authorize(&state, requester)?;
        if state.is_completed() {
            return Err(SessionError::Completed(session_id.to_string()));
        }

        let now = Utc::now();
        state.status = SessionStatus::Completed;
        state.ended_at = Some(now);
        state.updated_at = now;
        if notes.is_some() {
            state.final_notes = notes;
        }
        state.window.clear();
        self.persist(&state).await?;

        let mut summary = SessionSummary::from_state(&state, now);
        if auto_save {
            summary.saved_records = workout_records(&state, now);
        }

        info!(
            "Ended session {}: {} reps, {} sets in {}s",
            session_id, summary.stats.total_reps, summary.stats.total_sets, summary.stats.elapsed_seconds
        );
        Ok(summary)
    }

    pub async fn status(
        &self,
        session_id: &str,
        requester: Option<&str>,
    ) -> Result<SessionReport, SessionError> {
        let handle = self.handle(session_id).await?;
        let state = handle.lock().await;
        ensure_live(&state)?;
        authorize(&state, requester)?;

        Ok(SessionReport {
            session_id: state.session_id.clone(),
            status: state.status,
            stats: SessionStats::from_state(&state, Utc::now()),
            recent_frames: state.recent_frames.iter().cloned().collect(),
            recent_batches: state.recent_batches.iter().cloned().collect(),
            exercise_switches: state.exercise_switches.clone(),
        })
    }

    /// Sessions not yet completed, optionally only those of one user
    pub async fn active_sessions(&self, user_id: Option<&str>) -> Result<Vec<ActiveSession>, SessionError> {
        let mut ids = self.store.list().await?;
        for entry in self.sessions.iter() {
            if !ids.contains(entry.key()) {
                ids.push(entry.key().clone());
            }
        }

        let mut active = Vec::new();
        for id in ids {
            let handle = match self.handle(&id).await {
                Ok(handle) => handle,
                Err(SessionError::NotFound(_)) => continue,
                Err(e) => {
                    warn!("Skipping unreadable session {}: {}", id, e);
                    continue;
                }
            };
            let state = handle.lock().await;
            if state.removed || state.is_completed() {
                continue;
            }
            if user_id.is_some() && state.user_id.as_deref() != user_id {
                continue;
            }
            active.push(ActiveSession::from(&*state));
        }

        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(active)
    }

    /// Delete completed sessions past retention and idle sessions past expiry
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport, SessionError> {
        let mut report = CleanupReport::default();

        for id in self.store.list().await? {
            let handle = match self.handle(&id).await {
                Ok(handle) => handle,
                Err(SessionError::NotFound(_)) => continue,
                Err(SessionError::Storage(StoreError::Serialization(e))) => {
                    warn!("Removing corrupt session {}: {}", id, e);
                    self.store.delete(&id).await?;
                    report.removed.push(id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Deleted under the lock so a queued update sees the tombstone
            // instead of writing the session back
            let mut state = handle.lock().await;
            if state.removed {
                continue;
            }
            let expired = match state.ended_at {
                Some(ended_at) if state.is_completed() => ended_at + self.settings.retention < now,
                _ => {
                    let last_write = self.store.mtime(&id).await?.unwrap_or(state.updated_at);
                    last_write + self.settings.idle_expiry < now
                }
            };

            if expired {
                self.store.delete(&id).await?;
                state.removed = true;
                self.sessions.remove_if(&id, |_, held| Arc::ptr_eq(held, &handle));
                report.removed.push(id);
            } else {
                report.retained += 1;
            }
        }

        if !report.removed.is_empty() {
            info!("Session cleanup removed {} sessions", report.removed.len());
        }
        Ok(report)
    }

    async fn handle(&self, session_id: &str) -> Result<Arc<Mutex<SessionState>>, SessionError> {
        if let Some(handle) = self.sessions.get(session_id) {
            return Ok(Arc::clone(handle.value()));
        }
        if !is_valid_key(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let value = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let state: SessionState = serde_json::from_value(value).map_err(StoreError::from)?;
        debug!("Rehydrated session {} from {}", session_id, self.store.describe());

        let handle = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(state)));
        Ok(Arc::clone(handle.value()))
    }

    async fn persist(&self, state: &SessionState) -> Result<(), StoreError> {
        let value = serde_json::to_value(state)?;
        self.store.put(&state.session_id, &value).await
    }
}

fn ensure_live(state: &SessionState) -> Result<(), SessionError> {
    if state.removed {
        return Err(SessionError::NotFound(state.session_id.clone()));
    }
    Ok(())
}

fn authorize(state: &SessionState, requester: Option<&str>) -> Result<(), SessionError> {
    match (state.user_id.as_deref(), requester) {
        (Some(owner), Some(requester)) if owner != requester => {
            Err(SessionError::Forbidden(state.session_id.clone()))
        }
        _ => Ok(()),
    }
}

/// One record per exercise with counted reps. Duration is split by rep share.
fn workout_records(state: &SessionState, now: DateTime<Utc>) -> Vec<WorkoutRecord> {
    let total_reps = state.total_reps();
    if total_reps == 0 {
        return Vec::new();
    }
    let elapsed = state.elapsed_seconds(now);

    state
        .progress
        .iter()
        .filter(|(_, progress)| progress.reps() > 0)
        .map(|(exercise, progress)| WorkoutRecord {
            session_id: state.session_id.clone(),
            workout_id: state.workout_id.clone(),
            exercise: *exercise,
            reps: progress.reps(),
            sets: progress.sets,
            duration_seconds: elapsed * i64::from(progress.reps()) / i64::from(total_reps),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AngleMetric, RepPhase};
    use crate::services::session_store::InMemorySessionStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory store with slow reads and switchable write failures
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemorySessionStore,
        read_delay: Option<std::time::Duration>,
        fail_puts: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.get(id).await
        }

        async fn put(&self, id: &str, state: &Value) -> Result<(), StoreError> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
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
            "flaky".to_string()
        }
    }

    async fn let_tasks_run() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn tracker() -> (SessionTracker, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        (SessionTracker::new(store.clone(), SessionSettings::default()), store)
    }

    fn start_request(id: &str, user: &str, exercise: ExerciseKind) -> StartSession {
        StartSession {
            session_id: Some(id.to_string()),
            user_id: Some(user.to_string()),
            exercises: vec![exercise],
            ..StartSession::default()
        }
    }

    /// Drive one full pushup cycle through the session's rep machine
    fn pushup_rep(state: &mut SessionState, settings: &SessionSettings) {
        let elbow = |v: f64| -> AngleSet { [(AngleMetric::ElbowAngle, v)].into_iter().collect() };
        for (angle, motion) in [(90.0, 0.5), (150.0, 0.5), (150.0, 0.1)] {
            advance_session(state, ExerciseKind::Pushup, &elbow(angle), motion, settings.reps_per_set);
        }
    }

    #[tokio::test]
    async fn test_start_assigns_id_and_persists() {
        let (tracker, store) = tracker();

        let summary = tracker.start(StartSession::default()).await.unwrap();

        assert!(summary.session_id.starts_with("session_"));
        assert_eq!(summary.status, SessionStatus::Created);
        assert_eq!(summary.exercises, vec![ExerciseKind::Pushup]);
        assert!(store.get(&summary.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_rejects_bad_and_duplicate_ids() {
        let (tracker, _) = tracker();
        tracker.start(start_request("dup", "u1", ExerciseKind::Pushup)).await.unwrap();

        assert_matches!(
            tracker.start(start_request("dup", "u1", ExerciseKind::Pushup)).await,
            Err(SessionError::AlreadyExists(_))
        );
        assert_matches!(
            tracker.start(start_request("no/slashes", "u1", ExerciseKind::Pushup)).await,
            Err(SessionError::InvalidId(_))
        );
    }

    #[tokio::test]
    async fn test_update_activates_and_counts() {
        let (tracker, _) = tracker();
        tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.unwrap();

        let (reps, note) = tracker
            .update("s1", |state, settings| {
                pushup_rep(state, settings);
                state.touch();
                state.reps_for(ExerciseKind::Pushup)
            })
            .await
            .unwrap();

        assert_eq!(reps, 1);
        assert!(note.is_none());
        let report = tracker.status("s1", None).await.unwrap();
        assert_eq!(report.status, SessionStatus::Active);
        assert_eq!(report.stats.total_reps, 1);
    }

    #[tokio::test]
    async fn test_switch_keeps_other_counters() {
        let (tracker, _) = tracker();
        tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker
            .update("s1", |state, settings| {
                for _ in 0..5 {
                    pushup_rep(state, settings);
                }
            })
            .await
            .unwrap();

        let outcome = tracker
            .switch_exercise("s1", Some("u1"), ExerciseKind::ShoulderPress)
            .await
            .unwrap();
        assert_eq!(outcome.previous, ExerciseKind::Pushup);
        assert_eq!(outcome.current_reps, 0);

        let back = tracker.switch_exercise("s1", Some("u1"), ExerciseKind::Pushup).await.unwrap();
        assert_eq!(back.current_reps, 5);
        assert_eq!(back.total_switches, 2);

        let report = tracker.status("s1", None).await.unwrap();
        assert_eq!(report.exercise_switches[0].to, ExerciseKind::ShoulderPress);
    }

    #[tokio::test]
    async fn test_owner_check() {
        let (tracker, _) = tracker();
        tracker.start(start_request("s1", "owner", ExerciseKind::Pushup)).await.unwrap();

        assert_matches!(tracker.status("s1", Some("intruder")).await, Err(SessionError::Forbidden(_)));
        assert_matches!(
            tracker.end("s1", Some("intruder"), false, None).await,
            Err(SessionError::Forbidden(_))
        );
        assert!(tracker.status("s1", Some("owner")).await.is_ok());
    }

    #[tokio::test]
    async fn test_end_completes_and_blocks_updates() {
        let (tracker, _) = tracker();
        tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker.update("s1", pushup_rep).await.unwrap();

        let summary = tracker.end("s1", Some("u1"), true, Some("felt good".to_string())).await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert!(summary.ended_at.is_some());
        assert_eq!(summary.saved_records.len(), 1);
        assert_eq!(summary.saved_records[0].reps, 1);
        assert_eq!(summary.final_notes.as_deref(), Some("felt good"));

        assert_matches!(tracker.update("s1", |_, _| ()).await, Err(SessionError::Completed(_)));
        assert_matches!(tracker.begin("s1", None, None).await, Err(SessionError::Completed(_)));
        assert_matches!(tracker.end("s1", None, false, None).await, Err(SessionError::Completed(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (tracker, _) = tracker();

        assert_matches!(tracker.status("missing", None).await, Err(SessionError::NotFound(_)));
        assert_matches!(tracker.begin("../x", None, None).await, Err(SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sessions_rehydrate_from_store() {
        let store = Arc::new(InMemorySessionStore::new());
        let first = SessionTracker::new(store.clone(), SessionSettings::default());
        first.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.unwrap();
        first.update("s1", pushup_rep).await.unwrap();

        let second = SessionTracker::new(store, SessionSettings::default());
        let context = second.begin("s1", Some("u1"), None).await.unwrap();

        assert_eq!(context.tracker.rep_count, 1);
        assert_eq!(context.tracker.phase, RepPhase::Rest);
        assert!(context.history.is_empty());
    }

    #[tokio::test]
    async fn test_active_listing_filters() {
        let (tracker, _) = tracker();
        tracker.start(start_request("a", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker.start(start_request("b", "u2", ExerciseKind::TBarRow)).await.unwrap();
        tracker.start(start_request("c", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker.end("c", None, false, None).await.unwrap();

        let all = tracker.active_sessions(None).await.unwrap();
        let mine = tracker.active_sessions(Some("u1")).await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].session_id, "a");
    }

    #[tokio::test]
    async fn test_cleanup_honors_retention_and_idle_expiry() {
        let (tracker, store) = tracker();
        tracker.start(start_request("done", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker.start(start_request("idle", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker.start(start_request("fresh", "u1", ExerciseKind::Pushup)).await.unwrap();
        tracker.end("done", None, false, None).await.unwrap();

        let now = Utc::now();
        store.set_mtime("idle", now - Duration::hours(2));

        let early = tracker.cleanup_expired(now).await.unwrap();
        assert_eq!(early.removed, vec!["idle".to_string()]);
        assert_eq!(early.retained, 2);

        let later = tracker.cleanup_expired(now + Duration::minutes(61)).await.unwrap();
        assert!(later.removed.contains(&"done".to_string()));
        assert_matches!(tracker.status("done", None).await, Err(SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_starts_with_same_id() {
        let store = Arc::new(FlakyStore {
            read_delay: Some(std::time::Duration::from_millis(20)),
            ..FlakyStore::default()
        });
        let tracker = SessionTracker::new(store.clone(), SessionSettings::default());

        let (alice, bob) = tokio::join!(
            tracker.start(start_request("dup", "alice", ExerciseKind::Pushup)),
            tracker.start(start_request("dup", "bob", ExerciseKind::TBarRow)),
        );

        assert_eq!(alice.unwrap().user_id.as_deref(), Some("alice"));
        assert_matches!(bob, Err(SessionError::AlreadyExists(_)));
        assert!(tracker.status("dup", Some("alice")).await.is_ok());
        assert_matches!(tracker.status("dup", Some("bob")).await, Err(SessionError::Forbidden(_)));
        let stored = store.get("dup").await.unwrap().unwrap();
        assert_eq!(stored["user_id"], "alice");
    }

    #[tokio::test]
    async fn test_failed_start_releases_id() {
        let store = Arc::new(FlakyStore::default());
        let tracker = SessionTracker::new(store.clone(), SessionSettings::default());
        store.fail_puts.store(true, Ordering::SeqCst);

        assert_matches!(
            tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await,
            Err(SessionError::Storage(_))
        );
        assert_matches!(tracker.status("s1", None).await, Err(SessionError::NotFound(_)));
        assert!(tracker.active_sessions(None).await.unwrap().is_empty());

        store.fail_puts.store(false, Ordering::SeqCst);
        assert!(tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_reports_save_failure() {
        let store = Arc::new(FlakyStore::default());
        let tracker = SessionTracker::new(store.clone(), SessionSettings::default());
        tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.unwrap();
        store.fail_puts.store(true, Ordering::SeqCst);

        let (reps, note) = tracker
            .update("s1", |state, settings| {
                pushup_rep(state, settings);
                state.reps_for(ExerciseKind::Pushup)
            })
            .await
            .unwrap();

        assert_eq!(reps, 1);
        assert!(note.unwrap().contains("not saved"));
        assert_eq!(tracker.status("s1", None).await.unwrap().stats.total_reps, 1);
    }

    #[tokio::test]
    async fn test_sweep_wins_over_queued_update() {
        let (tracker, store) = tracker();
        let tracker = Arc::new(tracker);
        tracker.start(start_request("s1", "u1", ExerciseKind::Pushup)).await.unwrap();

        // Hold the session so the sweep and the update queue up in that order
        let handle = tracker.handle("s1").await.unwrap();
        let guard = handle.lock().await;
        let sweep = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.cleanup_expired(Utc::now() + Duration::hours(2)).await }
        });
        let_tasks_run().await;
        let update = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.update("s1", pushup_rep).await.map(|_| ()) }
        });
        let_tasks_run().await;
        drop(guard);

        let report = sweep.await.unwrap().unwrap();
        assert_eq!(report.removed, vec!["s1".to_string()]);
        assert_matches!(update.await.unwrap(), Err(SessionError::NotFound(_)));
        assert!(store.get("s1").await.unwrap().is_none());
        assert_matches!(tracker.status("s1", None).await, Err(SessionError::NotFound(_)));
    }
}
