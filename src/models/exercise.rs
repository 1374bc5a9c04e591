use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exercises the detection pipeline knows how to score.
///
/// Rule tables and rep state machines are keyed by this type, so an
/// unknown label is rejected at the boundary instead of being guessed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    #[default]
    Pushup,
    ShoulderPress,
    TBarRow,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown exercise: {0}")]
pub struct UnknownExercise(pub String);

/// One line of coaching guidance for an exercise
#[derive(Debug, Clone, Serialize)]
pub struct FormGuidance {
    pub key: &'static str,
    pub text: &'static str,
}

impl ExerciseKind {
    pub const ALL: [ExerciseKind; 3] = [
        ExerciseKind::Pushup,
        ExerciseKind::ShoulderPress,
        ExerciseKind::TBarRow,
    ];

    /// Machine label, as used on the wire and by the classifier
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseKind::Pushup => "pushup",
            ExerciseKind::ShoulderPress => "shoulder_press",
            ExerciseKind::TBarRow => "t_bar_row",
        }
    }

    /// Human readable name shown in feedback text
    pub fn display_name(&self) -> &'static str {
        match self {
            ExerciseKind::Pushup => "Push Up",
            ExerciseKind::ShoulderPress => "Shoulder Press",
            ExerciseKind::TBarRow => "T Bar Row",
        }
    }

    /// Coaching cues for the exercise, in the order they should be presented
    pub fn guidance(&self) -> Vec<FormGuidance> {
        let cues: &[(&'static str, &'static str)] = match self {
            ExerciseKind::Pushup => &[
                ("back_straight", "Keep your back straight throughout the movement"),
                ("elbows_in", "Keep your elbows close to your body at about 45 degrees"),
                ("full_range", "Lower until your chest nearly touches the floor"),
                ("core_tight", "Brace your core to stop the hips from sagging"),
                ("controlled_movement", "Move slowly and under control in both directions"),
            ],
            ExerciseKind::ShoulderPress => &[
                ("core_engaged", "Keep your core engaged and avoid arching the lower back"),
                ("full_extension", "Press until your arms are fully extended overhead"),
                ("controlled_lower", "Lower the weight back to shoulder height with control"),
                ("no_swinging", "Do not use momentum or swing the body"),
                ("proper_grip", "Keep your wrists stacked over your elbows"),
            ],
            ExerciseKind::TBarRow => &[
                ("back_straight", "Keep your back straight and chest up"),
                ("pull_to_chest", "Pull the bar towards your lower chest"),
                ("squeeze_back", "Squeeze your shoulder blades together at the top"),
                ("controlled_return", "Return the bar slowly until your arms are straight"),
                ("proper_stance", "Hinge at the hips with a slight bend in the knees"),
            ],
        };

        cues.iter()
            .map(|&(key, text)| FormGuidance { key, text })
            .collect()
    }
}

impl fmt::Display for ExerciseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExerciseKind {
    type Err = UnknownExercise;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExerciseKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownExercise(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_from_str() {
        for kind in ExerciseKind::ALL {
            assert_eq!(kind.as_str().parse::<ExerciseKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        assert_eq!(
            "deadlift".parse::<ExerciseKind>(),
            Err(UnknownExercise("deadlift".to_string()))
        );
        assert!(serde_json::from_str::<ExerciseKind>("\"squat\"").is_err());
    }

    #[test]
    fn test_serde_uses_snake_case_labels() {
        let json = serde_json::to_string(&ExerciseKind::TBarRow).unwrap();
        assert_eq!(json, "\"t_bar_row\"");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ExerciseKind::Pushup.display_name(), "Push Up");
        assert_eq!(ExerciseKind::ShoulderPress.display_name(), "Shoulder Press");
        assert_eq!(ExerciseKind::TBarRow.display_name(), "T Bar Row");
    }

    #[test]
    fn test_every_exercise_has_guidance() {
        for kind in ExerciseKind::ALL {
            assert_eq!(kind.guidance().len(), 5);
        }
    }
}
