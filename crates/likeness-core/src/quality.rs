//! Per-detection quality gate.
//!
//! Checks run cheapest first and stop at the first failure: box validity,
//! detector score, head pose, crop size, sharpness, then illumination.

use image::{imageops, GrayImage, RgbImage};
use thiserror::Error;

use crate::config::QualityConfig;
use crate::types::{BoundingBox, Detection};

/// Why a detection was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityRejection {
    #[error("bounding box is empty after clamping to the image")]
    InvalidBox,
    #[error("detection score {score} below {min}")]
    LowScore { score: f32, min: f32 },
    #[error("head pose {angle} exceeds {max} degrees")]
    ExtremePose { angle: f32, max: f32 },
    #[error("face {width}x{height} smaller than {min}px")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("face area {area} below {min}")]
    AreaTooSmall { area: u64, min: u64 },
    #[error("face is blurry (laplacian variance {variance:.1} < {threshold})")]
    Blurry { variance: f64, threshold: f64 },
    #[error("poor lighting (mean intensity {mean:.1} outside [{low}, {high}])")]
    PoorLighting { mean: f64, low: f64, high: f64 },
}

/// Outcome of [`QualityGate::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Accepted,
    Rejected(QualityRejection),
}

impl QualityVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, QualityVerdict::Accepted)
    }
}

/// Integer crop rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Truncate `bbox` to integer pixels and clamp it to a `width`x`height`
    /// image. Returns `None` when nothing remains.
    pub fn clamp(bbox: &BoundingBox, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (i64::from(width), i64::from(height));
        let x1 = (bbox.x1 as i64).clamp(0, w);
        let y1 = (bbox.y1 as i64).clamp(0, h);
        let x2 = (bbox.x2 as i64).clamp(0, w);
        let y2 = (bbox.y2 as i64).clamp(0, h);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn evaluate(&self, image: &RgbImage, detection: &Detection) -> QualityVerdict {
        match self.check(image, detection) {
            Ok(()) => QualityVerdict::Accepted,
            Err(rejection) => QualityVerdict::Rejected(rejection),
        }
    }

    fn check(&self, image: &RgbImage, detection: &Detection) -> Result<(), QualityRejection> {
        let cfg = &self.config;
        let rect = CropRect::clamp(&detection.bbox, image.width(), image.height())
            .ok_or(QualityRejection::InvalidBox)?;

        // Written so that a NaN score is rejected.
        if !(detection.score >= cfg.min_det_score) {
            return Err(QualityRejection::LowScore {
                score: detection.score,
                min: cfg.min_det_score,
            });
        }

        if let Some(pose) = detection.pose {
            let angle = pose.max_abs_angle();
            if !angle.is_finite() || angle > cfg.max_face_angle {
                return Err(QualityRejection::ExtremePose {
                    angle,
                    max: cfg.max_face_angle,
                });
            }
        }

        if rect.width.min(rect.height) < cfg.min_face_size {
            return Err(QualityRejection::TooSmall {
                width: rect.width,
                height: rect.height,
                min: cfg.min_face_size,
            });
        }
        if rect.area() < cfg.min_face_area {
            return Err(QualityRejection::AreaTooSmall {
                area: rect.area(),
                min: cfg.min_face_area,
            });
        }

        let crop = imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
        let gray = imageops::grayscale(&crop);

        let variance = laplacian_variance(&gray);
        if variance < cfg.blur_threshold {
            return Err(QualityRejection::Blurry {
                variance,
                threshold: cfg.blur_threshold,
            });
        }

        let mean = mean_intensity(&gray);
        if mean < cfg.illumination_low || mean > cfg.illumination_high {
            return Err(QualityRejection::PoorLighting {
                mean,
                low: cfg.illumination_low,
                high: cfg.illumination_high,
            });
        }

        Ok(())
    }
}

/// Population variance of the 4-neighbour Laplacian, with borders
/// reflected about the edge pixel (`gfedcb|abcdefgh|gfedcba`).
///
/// Convolved by hand: `imageproc::filter::laplacian_filter` clamps borders,
/// and reflect-101 keeps the variance on the same scale as `blur_threshold`.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    let n = u64::from(w) * u64::from(h);
    if n == 0 {
        return 0.0;
    }

    let px = |x: i64, y: i64| -> f64 {
        let xr = reflect101(x, w);
        let yr = reflect101(y, h);
        f64::from(gray.get_pixel(xr, yr)[0])
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..i64::from(h) {
        for x in 0..i64::from(w) {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let n = n as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

pub fn mean_intensity(gray: &GrayImage) -> f64 {
    let n = gray.width() as usize * gray.height() as usize;
    if n == 0 {
        return 0.0;
    }
    gray.as_raw().iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64
}

fn reflect101(i: i64, len: u32) -> u32 {
    let len = i64::from(len);
    if len == 1 {
        return 0;
    }
    let r = if i < 0 {
        -i
    } else if i >= len {
        2 * len - 2 - i
    } else {
        i
    };
    r.clamp(0, len - 1) as u32
}
