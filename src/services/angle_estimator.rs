//! Body metric estimation
//!
//! Two estimators are available. [`GeometricAngleEstimator`] computes real
//! joint angles from landmark positions and is the default.
//! [`SyntheticAngleEstimator`] reproduces the smooth trigonometric stand-in
//! the classifier's reference thresholds were first tuned against.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::{AngleMetric, AngleSet, BodyLandmark, ExerciseKind, FeatureVector, Landmark};

/// Derives an [`AngleSet`] from one frame.
///
/// Implementations must be deterministic and keep every metric inside its
/// plausible range.
pub trait AngleEstimator: Send + Sync {
    fn estimate(&self, features: &FeatureVector, exercise: ExerciseKind) -> AngleSet;
}

/// Which estimator the service runs with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleModel {
    #[default]
    Geometric,
    Synthetic,
}

impl AngleModel {
    pub fn build(self) -> Box<dyn AngleEstimator> {
        match self {
            AngleModel::Geometric => Box::new(GeometricAngleEstimator::new()),
            AngleModel::Synthetic => Box::new(SyntheticAngleEstimator),
        }
    }
}

impl FromStr for AngleModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geometric" => Ok(AngleModel::Geometric),
            "synthetic" => Ok(AngleModel::Synthetic),
            other => Err(format!("Unknown angle model: {}", other)),
        }
    }
}

/// Value used when a metric cannot be measured (occluded or degenerate joints)
fn neutral_value(metric: AngleMetric) -> f64 {
    match metric {
        AngleMetric::ElbowAngle => 90.0,
        AngleMetric::BackAngle => 5.0,
        AngleMetric::HipAlignment => 0.5,
        AngleMetric::ShoulderStability => 0.8,
        AngleMetric::CoreEngagement => 0.85,
        AngleMetric::ArmExtension => 170.0,
        AngleMetric::HipHinge => 25.0,
        AngleMetric::WristAlignment => 0.0,
        AngleMetric::ShoulderRetraction => 0.75,
        AngleMetric::BackStraightness => 0.0,
    }
}

/// Plausible range per metric, used to clamp estimates
fn plausible_range(metric: AngleMetric) -> (f64, f64) {
    match metric {
        AngleMetric::ElbowAngle | AngleMetric::ArmExtension => (0.0, 180.0),
        AngleMetric::BackAngle
        | AngleMetric::HipHinge
        | AngleMetric::WristAlignment
        | AngleMetric::BackStraightness => (-90.0, 90.0),
        AngleMetric::HipAlignment
        | AngleMetric::ShoulderStability
        | AngleMetric::CoreEngagement
        | AngleMetric::ShoulderRetraction => (0.0, 1.0),
    }
}

fn finish(metric: AngleMetric, value: Option<f64>) -> (AngleMetric, f64) {
    let (low, high) = plausible_range(metric);
    let value = value
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| neutral_value(metric));
    (metric, value.clamp(low, high))
}

/// Joint-angle geometry over MediaPipe landmarks (image y grows downwards)
#[derive(Debug, Clone)]
pub struct GeometricAngleEstimator {
    min_visibility: f64,
}

impl GeometricAngleEstimator {
    pub fn new() -> Self {
        Self { min_visibility: 0.3 }
    }

    /// Set minimum visibility for a landmark to take part in geometry
    pub fn with_min_visibility(mut self, min_visibility: f64) -> Self {
        self.min_visibility = min_visibility.clamp(0.0, 1.0);
        self
    }

    fn point(&self, features: &FeatureVector, landmark: BodyLandmark) -> Option<Landmark> {
        let point = features.body(landmark);
        point.is_valid(self.min_visibility).then_some(point)
    }

    fn midpoint(&self, features: &FeatureVector, a: BodyLandmark, b: BodyLandmark) -> Option<Landmark> {
        match (self.point(features, a), self.point(features, b)) {
            (Some(a), Some(b)) => Some(a.midpoint(&b)),
            (Some(one), None) | (None, Some(one)) => Some(one),
            (None, None) => None,
        }
    }

    /// Angle at `b` formed by `a-b-c`, in degrees
    pub fn joint_angle(a: &Landmark, b: &Landmark, c: &Landmark) -> Option<f64> {
        let (ba_x, ba_y) = (a.x - b.x, a.y - b.y);
        let (bc_x, bc_y) = (c.x - b.x, c.y - b.y);

        let dot_product = ba_x * bc_x + ba_y * bc_y;
        let mag_ba = (ba_x * ba_x + ba_y * ba_y).sqrt();
        let mag_bc = (bc_x * bc_x + bc_y * bc_y).sqrt();

        if mag_ba < f64::EPSILON || mag_bc < f64::EPSILON {
            return None;
        }

        let cos_angle = dot_product / (mag_ba * mag_bc);
        Some(cos_angle.clamp(-1.0, 1.0).acos().to_degrees())
    }

    /// Elbow angles for the (left, right) arms
    fn elbow_angles(&self, features: &FeatureVector) -> Vec<f64> {
        let arms = [
            (BodyLandmark::LeftShoulder, BodyLandmark::LeftElbow, BodyLandmark::LeftWrist),
            (BodyLandmark::RightShoulder, BodyLandmark::RightElbow, BodyLandmark::RightWrist),
        ];

        arms.iter()
            .filter_map(|(shoulder, elbow, wrist)| {
                let shoulder = self.point(features, *shoulder)?;
                let elbow = self.point(features, *elbow)?;
                let wrist = self.point(features, *wrist)?;
                Self::joint_angle(&shoulder, &elbow, &wrist)
            })
            .collect()
    }

    /// Signed forearm tilt from vertical, averaged over visible arms
    fn forearm_tilt(&self, features: &FeatureVector) -> Option<f64> {
        let arms = [
            (BodyLandmark::LeftElbow, BodyLandmark::LeftWrist),
            (BodyLandmark::RightElbow, BodyLandmark::RightWrist),
        ];

        let tilts: Vec<f64> = arms
            .iter()
            .filter_map(|(elbow, wrist)| {
                let elbow = self.point(features, *elbow)?;
                let wrist = self.point(features, *wrist)?;
                tilt_from_vertical(&elbow, &wrist)
            })
            .collect();

        mean(&tilts)
    }
}

impl Default for GeometricAngleEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl AngleEstimator for GeometricAngleEstimator {
    fn estimate(&self, features: &FeatureVector, _exercise: ExerciseKind) -> AngleSet {
        let shoulders = self.midpoint(features, BodyLandmark::LeftShoulder, BodyLandmark::RightShoulder);
        let hips = self.midpoint(features, BodyLandmark::LeftHip, BodyLandmark::RightHip);
        let nose = self.point(features, BodyLandmark::Nose);
        let elbows = self.elbow_angles(features);

        let torso_lean = match (&hips, &shoulders) {
            (Some(hips), Some(shoulders)) => tilt_from_vertical(hips, shoulders),
            _ => None,
        };
        let torso_inclination = match (&hips, &shoulders) {
            (Some(hips), Some(shoulders)) => inclination(hips, shoulders),
            _ => None,
        };
        let hip_alignment = match (&hips, &shoulders) {
            (Some(hips), Some(shoulders)) => {
                let torso = hips.distance_to(shoulders);
                (torso > f64::EPSILON).then(|| 0.5 + (hips.y - shoulders.y) / (2.0 * torso))
            }
            _ => None,
        };
        let hip_hinge = match (&hips, &nose) {
            (Some(hips), Some(nose)) => inclination(hips, nose),
            _ => None,
        };

        let left_shoulder = self.point(features, BodyLandmark::LeftShoulder);
        let right_shoulder = self.point(features, BodyLandmark::RightShoulder);
        let shoulder_stability = match (&left_shoulder, &right_shoulder) {
            (Some(left), Some(right)) => {
                let span = left.distance_to(right);
                if span < f64::EPSILON {
                    Some(1.0)
                } else {
                    Some(1.0 - ((left.y - right.y).abs() / span).min(1.0))
                }
            }
            _ => None,
        };
        let shoulder_retraction = match (
            &left_shoulder,
            &right_shoulder,
            self.point(features, BodyLandmark::LeftHip),
            self.point(features, BodyLandmark::RightHip),
        ) {
            (Some(ls), Some(rs), Some(lh), Some(rh)) => {
                let hip_span = lh.distance_to(&rh);
                (hip_span > f64::EPSILON).then(|| ls.distance_to(rs) / (1.25 * hip_span))
            }
            _ => None,
        };

        [
            finish(AngleMetric::ElbowAngle, mean(&elbows)),
            finish(AngleMetric::ArmExtension, elbows.iter().copied().reduce(f64::max)),
            finish(AngleMetric::BackAngle, torso_inclination),
            finish(AngleMetric::BackStraightness, torso_lean),
            finish(AngleMetric::HipAlignment, hip_alignment),
            finish(AngleMetric::ShoulderStability, shoulder_stability),
            finish(AngleMetric::CoreEngagement, torso_lean.map(|lean| 1.0 - lean.abs() / 90.0)),
            finish(AngleMetric::WristAlignment, self.forearm_tilt(features)),
            finish(AngleMetric::HipHinge, hip_hinge),
            finish(AngleMetric::ShoulderRetraction, shoulder_retraction),
        ]
        .into_iter()
        .collect()
    }
}

/// Elevation of `to` above `from` relative to horizontal, in degrees
fn inclination(from: &Landmark, to: &Landmark) -> Option<f64> {
    let run = (to.x - from.x).abs();
    let rise = from.y - to.y;
    if run < f64::EPSILON && rise.abs() < f64::EPSILON {
        return None;
    }
    Some(rise.atan2(run).to_degrees())
}

/// Signed deviation of the `from -> to` segment from straight up, in degrees
fn tilt_from_vertical(from: &Landmark, to: &Landmark) -> Option<f64> {
    let dx = to.x - from.x;
    let up = from.y - to.y;
    if dx.abs() < f64::EPSILON && up.abs() < f64::EPSILON {
        return None;
    }
    Some(dx.atan2(up.abs()).to_degrees())
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Smooth trigonometric functions of the first 20 feature values
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticAngleEstimator;

impl AngleEstimator for SyntheticAngleEstimator {
    fn estimate(&self, features: &FeatureVector, _exercise: ExerciseKind) -> AngleSet {
        let s: f64 = features.as_slice().iter().take(20).sum();

        [
            (AngleMetric::ElbowAngle, Some(90.0 + 20.0 * (s * 0.01).sin())),
            (AngleMetric::BackAngle, Some(5.0 + 15.0 * (s * 0.02).cos())),
            (AngleMetric::ArmExtension, Some(170.0 + 10.0 * (s * 0.015).sin())),
            (AngleMetric::HipAlignment, Some(0.5 + 0.2 * (s * 0.03).sin())),
            (AngleMetric::HipHinge, Some(25.0 + 15.0 * (s * 0.025).cos())),
            (AngleMetric::ShoulderStability, Some(0.8 + 0.15 * (s * 0.04).sin())),
            (AngleMetric::CoreEngagement, Some(0.85 + 0.1 * (s * 0.035).cos())),
            (AngleMetric::WristAlignment, Some(8.0 * (s * 0.05).sin())),
            (AngleMetric::ShoulderRetraction, Some(0.75 + 0.15 * (s * 0.045).cos())),
            (AngleMetric::BackStraightness, Some(0.0)),
        ]
        .into_iter()
        .map(|(metric, value)| finish(metric, value))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PoseInput, LANDMARK_COUNT};
    use crate::services::pose_normalizer::PoseNormalizer;
    use chrono::Utc;

    fn pose(points: &[(BodyLandmark, (f64, f64))]) -> FeatureVector {
        let mut landmarks = vec![Landmark::new(0.5, 0.9, 0.0, 0.9); LANDMARK_COUNT];
        for (landmark, (x, y)) in points {
            landmarks[landmark.index()] = Landmark::new(*x, *y, 0.0, 0.9);
        }
        PoseNormalizer::new().normalize(&PoseInput::from(landmarks), Utc::now())
    }

    fn standing_pose() -> FeatureVector {
        use BodyLandmark::*;
        pose(&[
            (Nose, (0.50, 0.10)),
            (LeftShoulder, (0.45, 0.25)),
            (RightShoulder, (0.55, 0.25)),
            (LeftElbow, (0.45, 0.40)),
            (RightElbow, (0.55, 0.40)),
            (LeftWrist, (0.45, 0.55)),
            (RightWrist, (0.55, 0.55)),
            (LeftHip, (0.46, 0.55)),
            (RightHip, (0.54, 0.55)),
        ])
    }

    #[test]
    fn test_joint_angle_right_angle() {
        let a = Landmark::new(0.0, 0.0, 0.0, 1.0);
        let b = Landmark::new(0.0, 1.0, 0.0, 1.0);
        let c = Landmark::new(1.0, 1.0, 0.0, 1.0);

        let angle = GeometricAngleEstimator::joint_angle(&a, &b, &c).unwrap();
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_joint_angle_rejects_zero_length_segments() {
        let a = Landmark::new(0.3, 0.3, 0.0, 1.0);
        assert_eq!(GeometricAngleEstimator::joint_angle(&a, &a, &a), None);
    }

    #[test]
    fn test_standing_pose_metrics() {
        let angles = GeometricAngleEstimator::new().estimate(&standing_pose(), ExerciseKind::ShoulderPress);

        assert!((angles.get(AngleMetric::ElbowAngle).unwrap() - 180.0).abs() < 1e-6);
        assert!((angles.get(AngleMetric::BackAngle).unwrap() - 90.0).abs() < 1e-6);
        assert!(angles.get(AngleMetric::BackStraightness).unwrap().abs() < 1e-6);
        assert!((angles.get(AngleMetric::CoreEngagement).unwrap() - 1.0).abs() < 1e-6);
        assert!((angles.get(AngleMetric::ShoulderStability).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(angles.get(AngleMetric::HipAlignment), Some(1.0));
    }

    #[test]
    fn test_occluded_joints_fall_back_to_neutral_values() {
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 0.1); LANDMARK_COUNT];
        landmarks[0] = Landmark::new(0.5, 0.1, 0.0, 0.1);
        let features = PoseNormalizer::new().normalize(&PoseInput::from(landmarks), Utc::now());

        let angles = GeometricAngleEstimator::new().estimate(&features, ExerciseKind::Pushup);
        assert_eq!(angles.get(AngleMetric::ElbowAngle), Some(90.0));
        assert_eq!(angles.get(AngleMetric::ShoulderRetraction), Some(0.75));
    }

    #[test]
    fn test_every_metric_is_present_and_bounded() {
        for estimator in [AngleModel::Geometric.build(), AngleModel::Synthetic.build()] {
            let angles = estimator.estimate(&standing_pose(), ExerciseKind::TBarRow);
            assert_eq!(angles.len(), AngleMetric::ALL.len());
            for (metric, value) in angles.iter() {
                let (low, high) = plausible_range(metric);
                assert!(value >= low && value <= high, "{} out of range: {}", metric, value);
            }
        }
    }

    #[test]
    fn test_synthetic_estimator_is_deterministic() {
        let features = standing_pose();
        let first = SyntheticAngleEstimator.estimate(&features, ExerciseKind::Pushup);
        let second = SyntheticAngleEstimator.estimate(&features, ExerciseKind::Pushup);

        assert_eq!(first, second);
    }

    #[test]
    fn test_synthetic_elbow_formula() {
        let features = FeatureVector::from_values(vec![0.0; 103]);
        let angles = SyntheticAngleEstimator.estimate(&features, ExerciseKind::Pushup);

        assert_eq!(angles.get(AngleMetric::ElbowAngle), Some(90.0));
        assert_eq!(angles.get(AngleMetric::BackAngle), Some(20.0));
        assert_eq!(angles.get(AngleMetric::ArmExtension), Some(170.0));
    }
}
