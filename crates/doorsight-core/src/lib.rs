//! doorsight-core — face gallery, identity matching, and face encoding.
//!
//! Encoding uses SCRFD for detection and ArcFace for recognition, both
//! running via ONNX Runtime on the CPU.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use encoder::{EncodeError, FaceEncoder, OnnxFaceEncoder};
pub use gallery::{build_gallery, GalleryError};
pub use matcher::{FirstMatchMatcher, MatchPolicy, Matcher, NearestMatcher, DEFAULT_TOLERANCE};
pub use types::{BoundingBox, Embedding, Gallery, GalleryEntry, MatchResult};

use std::path::PathBuf;

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/doorsight/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorsight/models")
}
