//! [`FaceAnalyzer`] backed by the SCRFD detector and ArcFace recognizer.

use std::path::Path;

use image::RgbImage;
use likeness_core::{AnalyzerError, Detection, FaceAnalyzer};
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ModelLoadError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        tracing::info!(dir = %model_dir.display(), "face models ready");
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
        self.detector
            .detect(image)
            .map_err(|e| AnalyzerError::Backend(Box::new(e)))
    }

    /// Detections without landmarks cannot be aligned and yield no embedding.
    fn embed(&mut self, image: &RgbImage, detection: &Detection) -> Result<Option<Vec<f32>>, AnalyzerError> {
        let Some(landmarks) = detection.landmarks.as_ref() else {
            return Ok(None);
        };
        match self.recognizer.extract(image, landmarks) {
            Ok(raw) => Ok(Some(raw)),
            Err(RecognizerError::DegenerateLandmarks) => {
                tracing::debug!(bbox = ?detection.bbox.to_array(), "degenerate landmarks, no embedding");
                Ok(None)
            }
            Err(e) => Err(AnalyzerError::Backend(Box::new(e))),
        }
    }
}
