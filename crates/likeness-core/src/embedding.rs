//! Unit-norm face embeddings and the normalizer that produces them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Norm below which a raw vector has no usable direction.
pub const DEFAULT_MIN_NORM: f32 = 1e-6;

/// Tolerance used when re-validating embeddings read back from storage.
const STORED_NORM_TOLERANCE: f64 = 1e-3;

/// Face embedding with unit L2 norm and finite components.
///
/// Only [`EmbeddingNormalizer::normalize`] and [`Embedding::from_stored`]
/// construct values, so every `Embedding` in the system upholds the
/// invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Rebuild an embedding from a persisted vector.
    ///
    /// Returns `None` if the vector is empty, has non-finite components, or
    /// is not unit length within a small tolerance.
    pub fn from_stored(values: Vec<f32>) -> Option<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let norm = l2_norm(&values);
        if (norm - 1.0).abs() > STORED_NORM_TOLERANCE {
            return None;
        }
        Some(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Both sides are unit length, so this is
    /// the dot product. Mismatched dimensions compare as orthogonal.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| f64::from(*a) * f64::from(*b))
            .sum::<f64>() as f32
    }

    /// Cosine distance in [0, 2]: `1 - similarity`.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).max(0.0)
    }
}

impl<'de> Deserialize<'de> for Embedding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            values: Vec<f32>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Embedding::from_stored(raw.values)
            .ok_or_else(|| serde::de::Error::custom("embedding is not a finite unit vector"))
    }
}

/// Why a raw vector was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingRejection {
    #[error("analyzer produced no embedding")]
    Missing,
    #[error("expected {expected}-dim embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("component {index} is not finite")]
    NonFinite { index: usize },
    #[error("norm {norm:e} is below the degenerate-vector floor")]
    Degenerate { norm: f64 },
}

/// Validates and unit-normalizes raw model output.
///
/// This is the only path from analyzer output into the store or a query.
#[derive(Debug, Clone)]
pub struct EmbeddingNormalizer {
    dimension: usize,
    min_norm: f32,
}

impl EmbeddingNormalizer {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            min_norm: DEFAULT_MIN_NORM,
        }
    }

    pub fn with_min_norm(mut self, min_norm: f32) -> Self {
        self.min_norm = min_norm;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn normalize(&self, raw: Option<&[f32]>) -> Result<Embedding, EmbeddingRejection> {
        let raw = raw.ok_or(EmbeddingRejection::Missing)?;

        if raw.len() != self.dimension {
            return Err(EmbeddingRejection::DimensionMismatch {
                expected: self.dimension,
                actual: raw.len(),
            });
        }

        if let Some(index) = raw.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingRejection::NonFinite { index });
        }

        // Accumulate in f64 so large 512-d vectors do not lose precision.
        let norm = l2_norm(raw);
        if !norm.is_finite() || norm < f64::from(self.min_norm) {
            return Err(EmbeddingRejection::Degenerate { norm });
        }

        let values = raw
            .iter()
            .map(|v| (f64::from(*v) / norm) as f32)
            .collect();
        Ok(Embedding { values })
    }
}

fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}
