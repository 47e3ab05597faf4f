//! Pipeline settings: defaults, optional TOML file, `LIKENESS_*` overrides.
//!
//! Settings are validated once at startup and are immutable afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an optional TOML settings file.
pub const CONFIG_PATH_ENV: &str = "LIKENESS_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error(
        "thresholds must satisfy match < uncertain < hard_reject (got {match_threshold} / {uncertain_threshold} / {hard_reject_threshold})"
    )]
    ThresholdOrder {
        match_threshold: f32,
        uncertain_threshold: f32,
        hard_reject_threshold: f32,
    },
    #[error("{field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

/// Vote aggregation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Distance below which the winner is a confident match.
    pub match_threshold: f32,
    /// Distance below which the winner is kept as a low-confidence match.
    pub uncertain_threshold: f32,
    /// Nearest-neighbor distance beyond which nothing can match.
    pub hard_reject_threshold: f32,
    /// Minimum score gap between the top two identities.
    pub min_similarity_margin: f32,
    pub min_votes: usize,
    /// Neighbors requested from the store and considered by the vote.
    pub top_k: usize,
    pub distance_epsilon: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.35,
            uncertain_threshold: 0.45,
            hard_reject_threshold: 0.65,
            min_similarity_margin: 0.05,
            min_votes: 1,
            top_k: 5,
            distance_epsilon: 1e-6,
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            self.match_threshold,
            self.uncertain_threshold,
            self.hard_reject_threshold,
        ];
        if thresholds.iter().any(|t| !t.is_finite())
            || !(self.match_threshold < self.uncertain_threshold
                && self.uncertain_threshold < self.hard_reject_threshold)
        {
            return Err(ConfigError::ThresholdOrder {
                match_threshold: self.match_threshold,
                uncertain_threshold: self.uncertain_threshold,
                hard_reject_threshold: self.hard_reject_threshold,
            });
        }
        if !(self.min_similarity_margin >= 0.0) {
            return Err(out_of_range("min_similarity_margin", "must be >= 0"));
        }
        if self.min_votes == 0 {
            return Err(out_of_range("min_votes", "must be at least 1"));
        }
        if self.top_k == 0 {
            return Err(out_of_range("top_k", "must be at least 1"));
        }
        if !(self.distance_epsilon > 0.0 && self.distance_epsilon.is_finite()) {
            return Err(out_of_range("distance_epsilon", "must be a small positive number"));
        }
        Ok(())
    }
}

/// Per-detection quality floors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_det_score: f32,
    /// Maximum |yaw|, |pitch| or |roll| in degrees.
    pub max_face_angle: f32,
    /// Minimum of crop width and height, in pixels.
    pub min_face_size: u32,
    /// Minimum crop area, in pixels.
    pub min_face_area: u64,
    /// Minimum Laplacian variance of the grayscale crop.
    pub blur_threshold: f64,
    pub illumination_low: f64,
    pub illumination_high: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_det_score: 0.5,
            max_face_angle: 45.0,
            min_face_size: 50,
            min_face_area: 2500,
            blur_threshold: 80.0,
            illumination_low: 40.0,
            illumination_high: 220.0,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_det_score) {
            return Err(out_of_range("min_det_score", "must be within [0, 1]"));
        }
        if !(self.max_face_angle > 0.0 && self.max_face_angle <= 180.0) {
            return Err(out_of_range("max_face_angle", "must be within (0, 180]"));
        }
        if !(self.blur_threshold >= 0.0) {
            return Err(out_of_range("blur_threshold", "must be >= 0"));
        }
        if !(0.0 <= self.illumination_low
            && self.illumination_low < self.illumination_high
            && self.illumination_high <= 255.0)
        {
            return Err(out_of_range(
                "illumination",
                format!(
                    "band [{}, {}] must be increasing within [0, 255]",
                    self.illumination_low, self.illumination_high
                ),
            ));
        }
        Ok(())
    }
}

/// Enrollment strength bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// Images considered per identity; extra images are ignored.
    pub max_embeddings_per_user: usize,
    /// Stored embeddings required for an identity to count as enrolled.
    pub min_embeddings_per_user: usize,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            max_embeddings_per_user: 20,
            min_embeddings_per_user: 3,
        }
    }
}

impl EnrollmentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_embeddings_per_user == 0 {
            return Err(out_of_range("min_embeddings_per_user", "must be at least 1"));
        }
        if self.max_embeddings_per_user < self.min_embeddings_per_user {
            return Err(out_of_range(
                "max_embeddings_per_user",
                format!(
                    "{} is below min_embeddings_per_user ({})",
                    self.max_embeddings_per_user, self.min_embeddings_per_user
                ),
            ));
        }
        Ok(())
    }
}

/// Recognition limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Faces matched per image, in detector order.
    pub max_faces_per_image: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            max_faces_per_image: 20,
        }
    }
}

/// All pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding_dim: usize,
    /// Longest image side accepted from disk, in pixels.
    pub max_image_dimension: u32,
    pub matcher: MatcherConfig,
    pub quality: QualityConfig,
    pub enrollment: EnrollmentConfig,
    pub recognition: RecognitionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_dim: 512,
            max_image_dimension: 4096,
            matcher: MatcherConfig::default(),
            quality: QualityConfig::default(),
            enrollment: EnrollmentConfig::default(),
            recognition: RecognitionConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings the way the binaries do: defaults, then the TOML file
    /// named by `LIKENESS_CONFIG` (if set), then `LIKENESS_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML file. Missing keys keep their defaults. Not validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `LIKENESS_*` overrides from `lookup`. Not validated.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let m = &mut self.matcher;
        override_value(&lookup, "LIKENESS_MATCH_THRESHOLD", &mut m.match_threshold)?;
        override_value(&lookup, "LIKENESS_UNCERTAIN_THRESHOLD", &mut m.uncertain_threshold)?;
        override_value(&lookup, "LIKENESS_HARD_REJECT_THRESHOLD", &mut m.hard_reject_threshold)?;
        override_value(&lookup, "LIKENESS_MIN_SIMILARITY_MARGIN", &mut m.min_similarity_margin)?;
        override_value(&lookup, "LIKENESS_MIN_VOTES", &mut m.min_votes)?;
        override_value(&lookup, "LIKENESS_TOP_K", &mut m.top_k)?;
        override_value(&lookup, "LIKENESS_DISTANCE_EPSILON", &mut m.distance_epsilon)?;

        let q = &mut self.quality;
        override_value(&lookup, "LIKENESS_MIN_DET_SCORE", &mut q.min_det_score)?;
        override_value(&lookup, "LIKENESS_MAX_FACE_ANGLE", &mut q.max_face_angle)?;
        override_value(&lookup, "LIKENESS_MIN_FACE_SIZE", &mut q.min_face_size)?;
        override_value(&lookup, "LIKENESS_MIN_FACE_AREA", &mut q.min_face_area)?;
        override_value(&lookup, "LIKENESS_BLUR_THRESHOLD", &mut q.blur_threshold)?;
        override_value(&lookup, "LIKENESS_ILLUMINATION_LOW", &mut q.illumination_low)?;
        override_value(&lookup, "LIKENESS_ILLUMINATION_HIGH", &mut q.illumination_high)?;

        let e = &mut self.enrollment;
        override_value(&lookup, "LIKENESS_MAX_EMBEDDINGS_PER_USER", &mut e.max_embeddings_per_user)?;
        override_value(&lookup, "LIKENESS_MIN_EMBEDDINGS_PER_USER", &mut e.min_embeddings_per_user)?;

        override_value(
            &lookup,
            "LIKENESS_MAX_FACES_PER_IMAGE",
            &mut self.recognition.max_faces_per_image,
        )?;
        override_value(&lookup, "LIKENESS_EMBEDDING_DIM", &mut self.embedding_dim)?;
        override_value(&lookup, "LIKENESS_MAX_IMAGE_DIMENSION", &mut self.max_image_dimension)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matcher.validate()?;
        self.quality.validate()?;
        self.enrollment.validate()?;
        if self.recognition.max_faces_per_image == 0 {
            return Err(out_of_range("max_faces_per_image", "must be at least 1"));
        }
        if self.embedding_dim == 0 {
            return Err(out_of_range("embedding_dim", "must be at least 1"));
        }
        if self.max_image_dimension == 0 {
            return Err(out_of_range("max_image_dimension", "must be at least 1"));
        }
        Ok(())
    }
}

fn override_value<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn out_of_range(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        reason: reason.into(),
    }
}
