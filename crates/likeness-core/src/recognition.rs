//! Per-face recognition over one input image.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::config::Settings;
use crate::embedding::{Embedding, EmbeddingNormalizer};
use crate::matcher::VoteAggregator;
use crate::pipeline::{FacePipeline, Prepared, SkipReason};
use crate::quality::QualityGate;
use crate::store::{IdentityStore, StoreError};
use crate::types::{Decision, Detection, MatchResult, NeighborMatch};

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse confidence for a resolved distance.
pub fn distance_to_confidence(distance: f32) -> f32 {
    if distance < 0.30 {
        0.98
    } else if distance < 0.40 {
        0.92
    } else if distance < 0.50 {
        0.80
    } else {
        0.0
    }
}

/// One recognized face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionRecord {
    pub user_id: Option<String>,
    pub decision: Decision,
    pub distance: f32,
    pub confidence: f32,
    pub bbox: [f32; 4],
    /// Enrollment photo of the closest neighbor of the resolved identity.
    pub matched_sample: Option<String>,
}

/// Outcome for the primary face of an image.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Skipped(SkipReason),
    Resolved(RecognitionRecord),
}

#[derive(Debug, Clone)]
pub struct RecognitionCoordinator {
    pipeline: FacePipeline,
    aggregator: VoteAggregator,
    max_faces: usize,
}

impl RecognitionCoordinator {
    pub fn new(pipeline: FacePipeline, aggregator: VoteAggregator, max_faces: usize) -> Self {
        Self {
            pipeline,
            aggregator,
            max_faces,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            FacePipeline::new(
                QualityGate::new(settings.quality.clone()),
                EmbeddingNormalizer::new(settings.embedding_dim),
            ),
            VoteAggregator::new(settings.matcher.clone()),
            settings.recognition.max_faces_per_image,
        )
    }

    /// Match every usable face in the image, in detector order.
    ///
    /// Faces past `max_faces_per_image` are ignored. Faces that fail the
    /// quality gate or normalization produce no record.
    pub fn recognize<A, S>(
        &self,
        analyzer: &mut A,
        store: &S,
        image: &RgbImage,
    ) -> Result<Vec<RecognitionRecord>, RecognizeError>
    where
        A: FaceAnalyzer + ?Sized,
        S: IdentityStore + ?Sized,
    {
        let detections = analyzer.detect(image)?;
        let total = detections.len();
        let mut records = Vec::new();
        for detection in detections.iter().take(self.max_faces) {
            match self.pipeline.prepare_face(analyzer, image, detection)? {
                Prepared::Ready(embedding) => {
                    records.push(self.resolve(store, &embedding, detection)?);
                }
                Prepared::Skipped(reason) => {
                    debug!(%reason, bbox = ?detection.bbox.to_array(), "face skipped");
                }
            }
        }
        info!(detected = total, recognized = records.len(), "image processed");
        Ok(records)
    }

    /// Match only the largest face. Used by evaluation, which scores one
    /// face per image.
    pub fn identify_primary<A, S>(
        &self,
        analyzer: &mut A,
        store: &S,
        image: &RgbImage,
    ) -> Result<Identification, RecognizeError>
    where
        A: FaceAnalyzer + ?Sized,
        S: IdentityStore + ?Sized,
    {
        let (detection, prepared) = self.pipeline.prepare_primary(analyzer, image)?;
        match (detection, prepared) {
            (Some(detection), Prepared::Ready(embedding)) => Ok(Identification::Resolved(
                self.resolve(store, &embedding, &detection)?,
            )),
            (_, Prepared::Skipped(reason)) => Ok(Identification::Skipped(reason)),
            (None, Prepared::Ready(_)) => Ok(Identification::Skipped(SkipReason::NoFace)),
        }
    }

    fn resolve<S: IdentityStore + ?Sized>(
        &self,
        store: &S,
        embedding: &Embedding,
        detection: &Detection,
    ) -> Result<RecognitionRecord, RecognizeError> {
        let neighbors = store.query(embedding, self.aggregator.config().top_k)?;
        let result = self.aggregator.resolve(&neighbors);
        let matched_sample = matched_sample(&result, &neighbors);
        Ok(RecognitionRecord {
            user_id: result.identity().map(str::to_string),
            decision: result.decision(),
            distance: result.distance(),
            confidence: distance_to_confidence(result.distance()),
            bbox: detection.bbox.to_array(),
            matched_sample,
        })
    }
}

fn matched_sample(result: &MatchResult, neighbors: &[NeighborMatch]) -> Option<String> {
    let identity = result.identity()?;
    neighbors
        .iter()
        .filter(|n| n.identity.as_deref() == Some(identity) && n.distance.is_finite())
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
        .and_then(|n| n.metadata.as_ref())
        .map(|m| m.image_name.clone())
}
