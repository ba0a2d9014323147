//! rollcall-core — Face identity types, matching policy and extraction.
//!
//! SCRFD finds faces and ArcFace embeds them, both through ONNX Runtime
//! behind the [`EmbeddingExtractor`] capability. [`CosineMatcher`] holds the
//! decision policy used for attendance matching and duplicate detection.

pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use extractor::{crop_face, EmbeddingExtractor, ExtractError, OnnxExtractor};
pub use matcher::{CosineMatcher, Matcher};
pub use types::{
    DetectedFace, DuplicateHit, Embedding, FaceRegion, Identity, IdentitySummary, MatchResult,
    Thresholds, DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_MATCH_THRESHOLD,
};
