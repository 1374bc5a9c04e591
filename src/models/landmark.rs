//! Landmark representations and the fixed-size feature encoding
//!
//! Clients send poses in several shapes. They are parsed once into a
//! [`PoseInput`] at the boundary; everything downstream works on the
//! canonical 25-landmark [`FeatureVector`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Landmarks kept per pose
pub const LANDMARK_COUNT: usize = 25;
/// Values stored per landmark (x, y, z, visibility)
pub const VALUES_PER_LANDMARK: usize = 4;
/// Auxiliary slots appended after the landmark block
pub const AUX_FEATURES: usize = 3;
/// Total length of every feature vector
pub const FEATURE_COUNT: usize = LANDMARK_COUNT * VALUES_PER_LANDMARK + AUX_FEATURES;

const DEFAULT_VISIBILITY: f64 = 0.8;

/// A single tracked body point in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// X coordinate (0-1, left to right)
    pub x: f64,
    /// Y coordinate (0-1, top to bottom)
    pub y: f64,
    /// Depth relative to the hips, 0 when the tracker is 2D only
    #[serde(default)]
    pub z: f64,
    /// Confidence that the point is correctly located (0-1)
    #[serde(default = "default_visibility")]
    pub visibility: f64,
}

fn default_visibility() -> f64 {
    DEFAULT_VISIBILITY
}

impl Landmark {
    /// Substitute used for padding and for entries that cannot be parsed
    pub const NEUTRAL: Landmark = Landmark {
        x: 0.5,
        y: 0.5,
        z: 0.0,
        visibility: DEFAULT_VISIBILITY,
    };

    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self { x, y, z, visibility }
    }

    /// Check if the landmark is confident enough to take part in geometry
    pub fn is_valid(&self, min_visibility: f64) -> bool {
        self.visibility >= min_visibility && self.x.is_finite() && self.y.is_finite()
    }

    /// Planar distance to another landmark
    pub fn distance_to(&self, other: &Landmark) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Midpoint of two landmarks, keeping the weaker visibility
    pub fn midpoint(&self, other: &Landmark) -> Landmark {
        Landmark {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
            visibility: self.visibility.min(other.visibility),
        }
    }
}

/// Body landmark indices (MediaPipe pose topology) used for geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLandmark {
    Nose = 0,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftHip = 23,
    RightHip = 24,
}

impl BodyLandmark {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
        }
    }
}

/// Shape a client pose was sent in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseShape {
    Keyed,
    Indexed,
    Raw,
    Empty,
}

/// A client pose parsed once at the boundary.
///
/// Accepts a bare landmark array or one wrapped in `pose_landmarks` /
/// `landmarks`. Entries inside a recognized array that cannot be read are
/// replaced by [`Landmark::NEUTRAL`] so indices never shift.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PoseInput {
    /// `[{"x": .., "y": .., "z": .., "visibility": ..}, ..]`
    Keyed(Vec<Landmark>),
    /// `[[x, y, z, visibility], ..]`
    Indexed(Vec<Landmark>),
    /// Present but in no recognizable shape
    Raw,
    /// Absent or an empty landmark list
    #[default]
    Empty,
}

impl PoseInput {
    /// Parse any JSON value into a pose input. Never fails.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PoseInput::Empty,
            Value::Object(map) => match map.get("pose_landmarks").or_else(|| map.get("landmarks")) {
                Some(inner) => PoseInput::from_value(inner),
                None => PoseInput::Raw,
            },
            Value::Array(items) => match items.first() {
                None => PoseInput::Empty,
                Some(Value::Object(_)) => {
                    PoseInput::Keyed(items.iter().map(parse_landmark).collect())
                }
                Some(Value::Array(_)) => {
                    PoseInput::Indexed(items.iter().map(parse_landmark).collect())
                }
                Some(_) => PoseInput::Raw,
            },
            _ => PoseInput::Raw,
        }
    }

    /// Landmarks as supplied, before padding or truncation
    pub fn landmarks(&self) -> &[Landmark] {
        match self {
            PoseInput::Keyed(landmarks) | PoseInput::Indexed(landmarks) => landmarks,
            PoseInput::Raw | PoseInput::Empty => &[],
        }
    }

    pub fn shape(&self) -> PoseShape {
        match self {
            PoseInput::Keyed(_) => PoseShape::Keyed,
            PoseInput::Indexed(_) => PoseShape::Indexed,
            PoseInput::Raw => PoseShape::Raw,
            PoseInput::Empty => PoseShape::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PoseInput::Empty)
    }
}

impl From<Vec<Landmark>> for PoseInput {
    fn from(landmarks: Vec<Landmark>) -> Self {
        if landmarks.is_empty() {
            PoseInput::Empty
        } else {
            PoseInput::Keyed(landmarks)
        }
    }
}

impl<'de> Deserialize<'de> for PoseInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(PoseInput::from_value(&value))
    }
}

fn parse_landmark(value: &Value) -> Landmark {
    match value {
        Value::Object(map) if map.contains_key("x") && map.contains_key("y") => {
            let field = |key: &str| map.get(key).and_then(coerce_float);
            Landmark {
                x: field("x").unwrap_or(0.0),
                y: field("y").unwrap_or(0.0),
                z: field("z").unwrap_or(0.0),
                visibility: field("visibility")
                    .or_else(|| field("score"))
                    .unwrap_or(DEFAULT_VISIBILITY),
            }
        }
        Value::Array(items) if items.len() >= 2 => {
            let field = |index: usize| items.get(index).and_then(coerce_float);
            Landmark {
                x: field(0).unwrap_or(0.0),
                y: field(1).unwrap_or(0.0),
                z: field(2).unwrap_or(0.0),
                visibility: field(3).unwrap_or(DEFAULT_VISIBILITY),
            }
        }
        _ => Landmark::NEUTRAL,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Fixed-length numeric encoding of a pose.
///
/// Layout: 25 landmarks x (x, y, z, visibility) followed by three
/// auxiliary slots (sub-second time fraction, then reserved 0.0 and 1.0).
/// The length is always [`FEATURE_COUNT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    /// Build from arbitrary values, zero-padding or truncating to [`FEATURE_COUNT`]
    pub fn from_values(mut values: Vec<f64>) -> Self {
        values.resize(FEATURE_COUNT, 0.0);
        for value in values.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Landmark at `index` (0..25) of the flattened block
    pub fn landmark(&self, index: usize) -> Landmark {
        if index >= LANDMARK_COUNT {
            return Landmark::NEUTRAL;
        }
        let base = index * VALUES_PER_LANDMARK;
        Landmark {
            x: self.0[base],
            y: self.0[base + 1],
            z: self.0[base + 2],
            visibility: self.0[base + 3],
        }
    }

    pub fn body(&self, landmark: BodyLandmark) -> Landmark {
        self.landmark(landmark.index())
    }

    pub fn landmarks(&self) -> impl Iterator<Item = Landmark> + '_ {
        (0..LANDMARK_COUNT).map(move |index| self.landmark(index))
    }

    /// The trailing auxiliary slots
    pub fn aux(&self) -> &[f64] {
        &self.0[LANDMARK_COUNT * VALUES_PER_LANDMARK..]
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self::from_values(values)
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(features: FeatureVector) -> Self {
        features.0
    }
}

/// Result of checking a client pose before analysis
#[derive(Debug, Clone, Serialize)]
pub struct PoseValidation {
    pub valid: bool,
    pub shape: PoseShape,
    pub landmark_count: usize,
    pub has_3d: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
