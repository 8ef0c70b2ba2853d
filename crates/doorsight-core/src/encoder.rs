//! Image-to-embeddings capability.
//!
//! [`FaceEncoder`] is the seam the gallery builder and the pipeline consume.
//! [`OnnxFaceEncoder`] is the production implementation: SCRFD detection
//! followed by ArcFace extraction for every detected face.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Maps an image file to zero or more face embeddings, ordered by
/// detection confidence (highest first).
pub trait FaceEncoder {
    fn encode(&mut self, image_path: &Path) -> Result<Vec<Embedding>, EncodeError>;
}

impl<T: FaceEncoder + ?Sized> FaceEncoder for Box<T> {
    fn encode(&mut self, image_path: &Path) -> Result<Vec<Embedding>, EncodeError> {
        (**self).encode(image_path)
    }
}

/// SCRFD + ArcFace encoder backed by ONNX Runtime.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, EncodeError> {
        let detector = FaceDetector::load(scrfd_path)?;
        tracing::info!(path = scrfd_path, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(arcface_path)?;
        tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image_path: &Path) -> Result<Vec<Embedding>, EncodeError> {
        let image = image::open(image_path)
            .map_err(|source| EncodeError::Image {
                path: image_path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let faces = self.detector.detect(&image)?;
        tracing::debug!(
            path = %image_path.display(),
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            "detected faces"
        );

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            embeddings.push(self.recognizer.extract(&image, face)?);
        }
        Ok(embeddings)
    }
}
