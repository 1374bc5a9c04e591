/// Pose normalization
///
/// Turns a parsed [`PoseInput`] into the canonical 25-landmark layout and
/// flattens it into a [`FeatureVector`]:
/// - pads short poses with the neutral landmark, truncates long ones
/// - substitutes a fully neutral pose for unrecognized input
/// - appends the time fraction and the two reserved slots
use chrono::{DateTime, Utc};

use crate::models::{
    FeatureVector, Landmark, PoseInput, PoseShape, PoseValidation, FEATURE_COUNT, LANDMARK_COUNT,
};

/// Poses with fewer landmarks than this trigger a validation warning
const MIN_EXPECTED_LANDMARKS: usize = 17;

const RESERVED_AUX: [f64; 2] = [0.0, 1.0];

#[derive(Debug, Clone, Default)]
pub struct PoseNormalizer;

impl PoseNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Exactly 25 landmarks in original order
    pub fn canonical_landmarks(&self, input: &PoseInput) -> Vec<Landmark> {
        let mut landmarks: Vec<Landmark> = input
            .landmarks()
            .iter()
            .take(LANDMARK_COUNT)
            .map(sanitize)
            .collect();
        landmarks.resize(LANDMARK_COUNT, Landmark::NEUTRAL);
        landmarks
    }

    /// Flatten a pose into a feature vector. Pure: the capture time is an input.
    pub fn normalize(&self, input: &PoseInput, captured_at: DateTime<Utc>) -> FeatureVector {
        let mut values = Vec::with_capacity(FEATURE_COUNT);
        for landmark in self.canonical_landmarks(input) {
            values.extend([landmark.x, landmark.y, landmark.z, landmark.visibility]);
        }
        values.push(time_fraction(captured_at));
        values.extend(RESERVED_AUX);

        FeatureVector::from_values(values)
    }

    /// Check a pose before analysis
    pub fn validate(&self, input: &PoseInput) -> PoseValidation {
        let landmarks = input.landmarks();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match input.shape() {
            PoseShape::Empty => errors.push("No pose landmarks detected".to_string()),
            PoseShape::Raw => errors.push("Unrecognized pose data format".to_string()),
            PoseShape::Keyed | PoseShape::Indexed => {}
        }

        if !landmarks.is_empty() && landmarks.len() < MIN_EXPECTED_LANDMARKS {
            warnings.push(format!(
                "Only {} landmarks supplied, at least {} expected",
                landmarks.len(),
                MIN_EXPECTED_LANDMARKS
            ));
        }
        if landmarks.len() > LANDMARK_COUNT {
            warnings.push(format!(
                "{} landmarks supplied, only the first {} are used",
                landmarks.len(),
                LANDMARK_COUNT
            ));
        }

        PoseValidation {
            valid: errors.is_empty(),
            shape: input.shape(),
            landmark_count: landmarks.len(),
            has_3d: landmarks.iter().any(|l| l.z != 0.0),
            errors,
            warnings,
        }
    }
}

fn sanitize(landmark: &Landmark) -> Landmark {
    let finite_or = |value: f64, fallback: f64| if value.is_finite() { value } else { fallback };
    Landmark {
        x: finite_or(landmark.x, Landmark::NEUTRAL.x),
        y: finite_or(landmark.y, Landmark::NEUTRAL.y),
        z: finite_or(landmark.z, Landmark::NEUTRAL.z),
        visibility: finite_or(landmark.visibility, Landmark::NEUTRAL.visibility),
    }
}

fn time_fraction(captured_at: DateTime<Utc>) -> f64 {
    f64::from(captured_at.timestamp_subsec_nanos() % 1_000_000_000) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VALUES_PER_LANDMARK;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn at_half_second() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap()
    }

    fn landmarks(count: usize) -> Vec<Landmark> {
        (0..count)
            .map(|i| Landmark::new(i as f64 / 100.0, 0.25, 0.0, 0.9))
            .collect()
    }

    #[test]
    fn test_short_pose_is_padded_with_neutral_landmarks() {
        let normalizer = PoseNormalizer::new();
        let features = normalizer.normalize(&PoseInput::from(landmarks(3)), at_half_second());

        assert_eq!(features.len(), FEATURE_COUNT);
        assert_eq!(features.landmark(2).x, 0.02);
        for index in 3..LANDMARK_COUNT {
            assert_eq!(features.landmark(index), Landmark::NEUTRAL);
        }
    }

    #[test]
    fn test_long_pose_keeps_first_landmarks_in_order() {
        let normalizer = PoseNormalizer::new();
        let features = normalizer.normalize(&PoseInput::from(landmarks(40)), at_half_second());

        for index in 0..LANDMARK_COUNT {
            assert_eq!(features.landmark(index).x, index as f64 / 100.0);
        }
    }

    #[test]
    fn test_aux_slots() {
        let normalizer = PoseNormalizer::new();
        let features = normalizer.normalize(&PoseInput::from(landmarks(25)), at_half_second());

        assert_eq!(features.aux(), &[0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_raw_input_becomes_neutral_pose() {
        let normalizer = PoseNormalizer::new();
        let input = PoseInput::from_value(&json!({"unexpected": true}));
        let features = normalizer.normalize(&input, at_half_second());

        assert!(features.landmarks().all(|l| l == Landmark::NEUTRAL));
    }

    #[test]
    fn test_validation_warns_on_sparse_pose() {
        let normalizer = PoseNormalizer::new();
        let report = normalizer.validate(&PoseInput::from(landmarks(12)));

        assert!(report.valid);
        assert_eq!(report.landmark_count, 12);
        assert!(!report.has_3d);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_validation_rejects_empty_pose() {
        let report = PoseNormalizer::new().validate(&PoseInput::Empty);

        assert!(!report.valid);
        assert_eq!(report.errors, vec!["No pose landmarks detected".to_string()]);
    }

    fn arbitrary_input() -> impl Strategy<Value = serde_json::Value> {
        let coord = -10.0f64..10.0;
        let keyed = prop::collection::vec(
            (coord.clone(), coord.clone(), prop::option::of(coord.clone()))
                .prop_map(|(x, y, z)| match z {
                    Some(z) => json!({"x": x, "y": y, "z": z}),
                    None => json!({"x": x, "y": y}),
                }),
            0..100,
        )
        .prop_map(serde_json::Value::from);
        let indexed = prop::collection::vec(
            prop::collection::vec(coord, 0..6).prop_map(serde_json::Value::from),
            0..100,
        )
        .prop_map(serde_json::Value::from);
        let junk = any::<String>().prop_map(serde_json::Value::from);

        prop_oneof![keyed, indexed, junk]
    }

    proptest! {
        #[test]
        fn test_feature_vector_length_is_invariant(value in arbitrary_input()) {
            let features = PoseNormalizer::new().normalize(&PoseInput::from_value(&value), Utc::now());
            prop_assert_eq!(features.len(), FEATURE_COUNT);
            prop_assert_eq!(features.as_slice().len(), LANDMARK_COUNT * VALUES_PER_LANDMARK + 3);
        }

        #[test]
        fn test_padding_slots_are_neutral(count in 0usize..25) {
            let features = PoseNormalizer::new()
                .normalize(&PoseInput::from(landmarks(count)), at_half_second());
            for index in count..LANDMARK_COUNT {
                prop_assert_eq!(features.landmark(index), Landmark::NEUTRAL);
            }
        }
    }
}
