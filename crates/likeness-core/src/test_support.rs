//! Synthetic images, a scripted analyzer and store doubles shared by tests.

use std::collections::HashMap;

use image::{Rgb, RgbImage};

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::embedding::{Embedding, EmbeddingNormalizer};
use crate::source::SourceImage;
use crate::store::{IdentityStore, MemoryStore, StoreError};
use crate::types::{BoundingBox, Detection, IdentitySummary, NeighborMatch, SampleMetadata};

const CELL: u32 = 4;

/// Gray checkerboard with 4px cells alternating between `a` and `b`.
pub(crate) fn checkerboard(width: u32, height: u32, a: u8, b: u8) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = if (x / CELL + y / CELL) % 2 == 0 { a } else { b };
        Rgb([v, v, v])
    })
}

pub(crate) fn flat_image(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

/// Tag an image so [`ScriptedAnalyzer`] can recognise it. The tag lives in
/// pixel (0, 0), which test face boxes never cover.
pub(crate) fn mark(mut image: RgbImage, marker: u8) -> RgbImage {
    image.put_pixel(0, 0, Rgb([255, 0, marker]));
    image
}

fn marker_of(image: &RgbImage) -> Option<u8> {
    match image.get_pixel_checked(0, 0) {
        Some(Rgb([255, 0, m])) => Some(*m),
        _ => None,
    }
}

pub(crate) fn source_image(name: &str, image: RgbImage) -> SourceImage {
    SourceImage {
        name: name.to_string(),
        image,
    }
}

/// Confident detection carrying an inline raw embedding.
pub(crate) fn face_at(x1: f32, y1: f32, x2: f32, y2: f32, embedding: Vec<f32>) -> Detection {
    Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.9).with_embedding(embedding)
}

pub(crate) fn unit(values: &[f32]) -> Embedding {
    EmbeddingNormalizer::new(values.len())
        .normalize(Some(values))
        .unwrap()
}

/// Returns pre-scripted detections keyed by image marker.
#[derive(Debug, Default)]
pub(crate) struct ScriptedAnalyzer {
    script: HashMap<u8, Vec<Detection>>,
    fail_on: Option<u8>,
    pub detect_calls: usize,
}

impl ScriptedAnalyzer {
    pub fn with_image(mut self, marker: u8, detections: Vec<Detection>) -> Self {
        self.script.insert(marker, detections);
        self
    }

    pub fn failing_on(mut self, marker: u8) -> Self {
        self.fail_on = Some(marker);
        self
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
        self.detect_calls += 1;
        let marker = marker_of(image);
        if marker.is_some() && marker == self.fail_on {
            return Err(AnalyzerError::Detection("scripted failure".into()));
        }
        Ok(marker
            .and_then(|m| self.script.get(&m).cloned())
            .unwrap_or_default())
    }
}

/// Memory store whose deletes always fail.
#[derive(Debug, Default)]
pub(crate) struct FailingDeleteStore {
    inner: MemoryStore,
}

impl IdentityStore for FailingDeleteStore {
    fn insert(
        &mut self,
        identity: &str,
        embedding: &Embedding,
        metadata: &SampleMetadata,
    ) -> Result<(), StoreError> {
        self.inner.insert(identity, embedding, metadata)
    }

    fn query(&self, embedding: &Embedding, k: usize) -> Result<Vec<NeighborMatch>, StoreError> {
        self.inner.query(embedding, k)
    }

    fn delete_by_identity(&mut self, _identity: &str) -> Result<usize, StoreError> {
        Err(StoreError::backend(std::io::Error::other("delete refused")))
    }

    fn exists(&self, identity: &str) -> Result<bool, StoreError> {
        self.inner.exists(identity)
    }

    fn list_all(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        self.inner.list_all()
    }
}
