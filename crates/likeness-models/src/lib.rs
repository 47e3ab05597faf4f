//! likeness-models: Face detection and embedding models.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running
//! via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod recognizer;

use std::path::PathBuf;

pub use analyzer::{ModelLoadError, OnnxFaceAnalyzer};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/likeness/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    data_home.join("likeness").join("models")
}
