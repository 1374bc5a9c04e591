/// Rep State Machine
///
/// Each (session, exercise) pair owns a [`RepTracker`] that cycles
/// rest -> down -> up -> rest. A rep is counted exactly on the up -> rest
/// transition. Thresholds are per exercise and applied to the governing
/// metric plus a motion intensity signal.
use statrs::statistics::Statistics;

use crate::models::{
    round_to, AngleMetric, AngleSet, ExerciseKind, FeatureVector, RepPhase, RepTracker, RepUpdate,
};

/// A threshold on the governing metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AngleGate {
    Below(f64),
    Above(f64),
}

impl AngleGate {
    fn admits(&self, value: f64) -> bool {
        match *self {
            AngleGate::Below(limit) => value < limit,
            AngleGate::Above(limit) => value > limit,
        }
    }
}

/// Transition thresholds for one exercise
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepCycle {
    pub metric: AngleMetric,
    /// rest -> down requires this gate and motion above `start_motion`
    pub descend: AngleGate,
    pub start_motion: f64,
    /// down -> up
    pub ascend: AngleGate,
    /// up -> rest once motion falls below this
    pub settle_motion: f64,
}

impl RepCycle {
    pub fn for_exercise(exercise: ExerciseKind) -> Self {
        match exercise {
            ExerciseKind::Pushup => RepCycle {
                metric: AngleMetric::ElbowAngle,
                descend: AngleGate::Below(100.0),
                start_motion: 0.3,
                ascend: AngleGate::Above(140.0),
                settle_motion: 0.2,
            },
            ExerciseKind::ShoulderPress => RepCycle {
                metric: AngleMetric::ArmExtension,
                descend: AngleGate::Below(170.0),
                start_motion: 0.4,
                ascend: AngleGate::Above(175.0),
                settle_motion: 0.3,
            },
            ExerciseKind::TBarRow => RepCycle {
                metric: AngleMetric::ElbowAngle,
                descend: AngleGate::Above(100.0),
                start_motion: 0.3,
                ascend: AngleGate::Below(80.0),
                settle_motion: 0.2,
            },
        }
    }
}

impl RepTracker {
    /// Feed one frame. The phase is sticky when no transition qualifies.
    pub fn advance(&mut self, exercise: ExerciseKind, angles: &AngleSet, motion: f64) -> RepUpdate {
        let cycle = RepCycle::for_exercise(exercise);
        let previous_phase = self.phase;
        let governing = angles.get(cycle.metric);
        let mut rep_completed = false;

        self.phase = match (self.phase, governing) {
            (RepPhase::Rest, Some(value))
                if cycle.descend.admits(value) && motion > cycle.start_motion =>
            {
                RepPhase::Down
            }
            (RepPhase::Down, Some(value)) if cycle.ascend.admits(value) => RepPhase::Up,
            (RepPhase::Up, _) if motion < cycle.settle_motion => {
                self.rep_count += 1;
                rep_completed = true;
                RepPhase::Rest
            }
            (phase, _) => phase,
        };

        RepUpdate {
            rep_completed,
            phase: self.phase,
            previous_phase,
            total_reps: self.rep_count,
            motion_intensity: motion,
        }
    }
}

/// Motion of a single frame with no history: `min(1, 100 x variance)`
pub fn motion_intensity(features: &FeatureVector) -> f64 {
    let variance = features.as_slice().iter().population_variance();
    if !variance.is_finite() {
        return 0.0;
    }
    round_to((100.0 * variance).min(1.0), 2)
}

/// Motion between consecutive frames: RMS planar landmark displacement
/// scaled by `gain`, clamped to [0, 1]
pub fn temporal_motion_intensity(current: &FeatureVector, previous: &FeatureVector, gain: f64) -> f64 {
    let squared: Vec<f64> = current
        .landmarks()
        .zip(previous.landmarks())
        .map(|(now, before)| {
            let distance = now.distance_to(&before);
            distance * distance
        })
        .collect();
    let rms = squared.iter().mean().sqrt();
    if !rms.is_finite() {
        return 0.0;
    }
    round_to((gain * rms).clamp(0.0, 1.0), 2)
}
