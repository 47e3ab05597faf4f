//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image into the 640x640 model input, decodes the three
//! stride levels into boxes with five landmarks, then applies NMS.

use image::imageops::{self, FilterType};
use image::RgbImage;
use likeness_core::{BoundingBox, Detection, Landmarks};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image has zero size")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from letterboxed input coordinates back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let (new_w, new_h) = Self::scaled(width, height, scale, target);
        Self {
            scale,
            pad_x: (target - new_w) / 2,
            pad_y: (target - new_h) / 2,
        }
    }

    fn scaled(width: u32, height: u32, scale: f32, target: u32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let h = ((height as f32 * scale).round() as u32).clamp(1, target);
        (w, h)
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }
        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(
                StrideOutputs { scores, bboxes, kps },
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), "SCRFD detections after NMS");
        Ok(kept)
    }
}

/// Letterbox into a 1x3x640x640 RGB tensor. Padding normalizes to 0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE;
    let letterbox = Letterbox::fit(image.width(), image.height(), size);
    let (new_w, new_h) = Letterbox::scaled(image.width(), image.height(), letterbox.scale, size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    (tensor, letterbox)
}

/// Map stride slots to output tensors by name ("score_8", "bbox_16", ...),
/// falling back to positional order [scores 8/16/32, bboxes, kps].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0usize, 0usize, 0usize); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[slot] = (s, b, k),
            _ => {
                tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

fn decode_stride(
    out: StrideOutputs<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = out.scores.get(idx).copied().unwrap_or(0.0);
        if !(score > threshold) {
            continue;
        }
        let Some(offsets) = out.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_source(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
        let (x2, y2) = letterbox.to_source(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

        let mut detection = Detection::new(BoundingBox::new(x1, y1, x2, y2), score);
        if let Some(points) = out.kps.get(idx * 10..idx * 10 + 10) {
            let mut landmarks: Landmarks = [(0.0, 0.0); 5];
            for (i, lm) in landmarks.iter_mut().enumerate() {
                *lm = letterbox.to_source(
                    anchor_x + points[i * 2] * step,
                    anchor_y + points[i * 2 + 1] * step,
                );
            }
            detection = detection.with_landmarks(landmarks);
        }
        detections.push(detection);
    }
    detections
}

/// Greedy non-maximum suppression; output sorted by descending score.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
