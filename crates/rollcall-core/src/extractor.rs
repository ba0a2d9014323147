//! Embedding extraction capability.
//!
//! Registration and attendance only see [`EmbeddingExtractor`]. Detection and
//! crop-only embedding are separate methods rather than a mode switch.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectedFace, Embedding, FaceRegion};
use image::{imageops, RgbImage};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// The image holds no usable face. Attendance treats this as "everyone absent".
    #[error("no face detected")]
    NoFace,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl ExtractError {
    pub fn is_no_face(&self) -> bool {
        matches!(self, ExtractError::NoFace)
    }
}

/// Opaque face embedding capability.
pub trait EmbeddingExtractor {
    /// Find every face in `image` and embed each one.
    ///
    /// An empty list and [`ExtractError::NoFace`] both mean "no face".
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError>;

    /// Embed a crop that is already known to contain a single face.
    fn embed(&mut self, face_crop: &RgbImage) -> Result<Embedding, ExtractError>;
}

/// Copy `region` out of `image`. The region must lie inside the image.
pub fn crop_face(image: &RgbImage, region: &FaceRegion) -> RgbImage {
    imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image()
}

/// SCRFD + ArcFace extractor backed by ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Model file names expected inside the model directory.
    pub const DETECTOR_MODEL: &'static str = "det_10g.onnx";
    pub const RECOGNIZER_MODEL: &'static str = "w600k_r50.onnx";

    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path, confidence_threshold: f32) -> Result<Self, ExtractError> {
        let detector_path = model_dir.join(Self::DETECTOR_MODEL);
        let recognizer_path = model_dir.join(Self::RECOGNIZER_MODEL);

        let detector = FaceDetector::load(&detector_path.to_string_lossy(), confidence_threshold)?;
        let recognizer = FaceRecognizer::load(&recognizer_path.to_string_lossy())?;

        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let bounds = image.dimensions();
        let boxes = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for b in boxes {
            let Some(region) = FaceRegion::clamped(b.x, b.y, b.width, b.height, bounds) else {
                tracing::debug!(x = b.x, y = b.y, "dropping detection outside image bounds");
                continue;
            };
            let embedding = self.recognizer.embed(&crop_face(image, &region))?;
            faces.push(DetectedFace {
                region,
                confidence: b.confidence,
                embedding,
            });
        }

        if faces.is_empty() {
            return Err(ExtractError::NoFace);
        }
        Ok(faces)
    }

    fn embed(&mut self, face_crop: &RgbImage) -> Result<Embedding, ExtractError> {
        match self.recognizer.embed(face_crop) {
            Err(RecognizerError::EmptyCrop) => Err(ExtractError::NoFace),
            other => Ok(other?),
        }
    }
}
