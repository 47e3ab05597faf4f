use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Face bounding box in source-image pixel coordinates (corner form).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area of the box; inverted boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Head pose in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Pose {
    /// Largest absolute angle; NaN if any angle is NaN.
    pub fn max_abs_angle(&self) -> f32 {
        if self.yaw.is_nan() || self.pitch.is_nan() || self.roll.is_nan() {
            return f32::NAN;
        }
        self.yaw.abs().max(self.pitch.abs()).max(self.roll.abs())
    }
}

/// A face reported by the analyzer for one image.
///
/// `pose`, `landmarks` and `embedding` are optional because not every
/// detector produces them; the quality gate and embedder check presence
/// explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
    pub pose: Option<Pose>,
    pub landmarks: Option<Landmarks>,
    /// Raw (unnormalized) embedding, when the detector computes it inline.
    pub embedding: Option<Vec<f32>>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32) -> Self {
        Self {
            bbox,
            score,
            pose: None,
            landmarks: None,
            embedding: None,
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Metadata stored next to each enrolled embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// File name of the enrollment photo the embedding came from.
    pub image_name: String,
    /// Which path produced the sample (e.g. "enroll").
    pub source: String,
}

impl SampleMetadata {
    pub fn new(image_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            source: source.into(),
        }
    }
}

/// A stored embedding for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    pub identity: String,
    pub embedding: Embedding,
    pub metadata: SampleMetadata,
    pub created_at: String,
}

/// One neighbor returned by a store query.
///
/// `identity` is optional and `distance` may be non-finite when a backend
/// returns malformed rows; the matcher discards those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborMatch {
    pub identity: Option<String>,
    /// Cosine distance to the probe (0 = identical direction).
    pub distance: f32,
    pub metadata: Option<SampleMetadata>,
}

impl NeighborMatch {
    pub fn new(identity: impl Into<String>, distance: f32) -> Self {
        Self {
            identity: Some(identity.into()),
            distance,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: SampleMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-identity summary returned by `IdentityStore::list_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub identity: String,
    pub samples: usize,
}

/// Outcome class of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Match,
    Uncertain,
    Unknown,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Decision::Match => "MATCH",
            Decision::Uncertain => "UNCERTAIN",
            Decision::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Result of matching a probe against its nearest neighbors.
///
/// Fields are private so the identity can only be present when the
/// decision is not `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    decision: Decision,
    identity: Option<String>,
    distance: f32,
}

impl MatchResult {
    pub fn matched(identity: impl Into<String>, distance: f32) -> Self {
        Self {
            decision: Decision::Match,
            identity: Some(identity.into()),
            distance,
        }
    }

    /// Low-confidence result; `identity` is `None` when the candidates are
    /// too close to call.
    pub fn uncertain(identity: Option<String>, distance: f32) -> Self {
        Self {
            decision: Decision::Uncertain,
            identity,
            distance,
        }
    }

    pub fn unknown(distance: f32) -> Self {
        Self {
            decision: Decision::Unknown,
            identity: None,
            distance,
        }
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }
}
