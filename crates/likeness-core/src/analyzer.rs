use image::RgbImage;
use thiserror::Error;

use crate::types::Detection;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("embedding extraction failed: {0}")]
    Embedding(String),
    #[error("analyzer backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Face detection and embedding backend.
///
/// Implementations may compute embeddings inline during `detect` (and leave
/// the default `embed`), or lazily per detection.
pub trait FaceAnalyzer {
    /// All faces in the image, in the backend's own order.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError>;

    /// Raw embedding for one detection, or `None` when the backend cannot
    /// produce one for it.
    fn embed(
        &mut self,
        image: &RgbImage,
        detection: &Detection,
    ) -> Result<Option<Vec<f32>>, AnalyzerError> {
        let _ = image;
        Ok(detection.embedding.clone())
    }
}
