//! Shared per-image preparation: pick the primary face, gate it, embed it.

use image::RgbImage;
use thiserror::Error;

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::embedding::{Embedding, EmbeddingNormalizer, EmbeddingRejection};
use crate::quality::{QualityGate, QualityRejection, QualityVerdict};
use crate::types::Detection;

/// Why an image or face did not yield an embedding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("no face detected")]
    NoFace,
    #[error(transparent)]
    Quality(#[from] QualityRejection),
    #[error(transparent)]
    Embedding(#[from] EmbeddingRejection),
}

/// Result of preparing one face.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Ready(Embedding),
    Skipped(SkipReason),
}

/// Index of the detection with the largest box area. Ties keep the first.
pub fn largest_face(detections: &[Detection]) -> Option<usize> {
    detections
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, d)| {
            let area = d.bbox.area();
            match best {
                Some((_, best_area)) if best_area >= area => best,
                _ => Some((i, area)),
            }
        })
        .map(|(i, _)| i)
}

#[derive(Debug, Clone)]
pub struct FacePipeline {
    gate: QualityGate,
    normalizer: EmbeddingNormalizer,
}

impl FacePipeline {
    pub fn new(gate: QualityGate, normalizer: EmbeddingNormalizer) -> Self {
        Self { gate, normalizer }
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn normalizer(&self) -> &EmbeddingNormalizer {
        &self.normalizer
    }

    /// Quality-check one detection and turn it into a unit embedding.
    pub fn prepare_face<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        image: &RgbImage,
        detection: &Detection,
    ) -> Result<Prepared, AnalyzerError> {
        if let QualityVerdict::Rejected(rejection) = self.gate.evaluate(image, detection) {
            return Ok(Prepared::Skipped(rejection.into()));
        }
        let raw = analyzer.embed(image, detection)?;
        Ok(match self.normalizer.normalize(raw.as_deref()) {
            Ok(embedding) => Prepared::Ready(embedding),
            Err(rejection) => Prepared::Skipped(rejection.into()),
        })
    }

    /// Detect faces and prepare the largest one.
    ///
    /// Returns the chosen detection alongside the outcome, if any face was found.
    pub fn prepare_primary<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        image: &RgbImage,
    ) -> Result<(Option<Detection>, Prepared), AnalyzerError> {
        let mut detections = analyzer.detect(image)?;
        let Some(index) = largest_face(&detections) else {
            return Ok((None, Prepared::Skipped(SkipReason::NoFace)));
        };
        let detection = detections.swap_remove(index);
        let prepared = self.prepare_face(analyzer, image, &detection)?;
        Ok((Some(detection), prepared))
    }
}
