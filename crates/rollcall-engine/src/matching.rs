//! Attendance matching: every detected face against the whole roster.

use image::RgbImage;
use rollcall_core::{
    crop_face, CosineMatcher, DetectedFace, Embedding, EmbeddingExtractor, ExtractError, FaceRegion, Identity,
    MatchResult, Matcher,
};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Outcome for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub region: FaceRegion,
    pub confidence: f32,
    #[serde(flatten)]
    pub result: MatchResult,
}

/// Everything matching learned from one photo.
#[derive(Debug, Clone, Default)]
pub struct SessionMatches {
    /// IDs matched by at least one face.
    pub present: BTreeSet<String>,
    /// One entry per face that was considered, in detection order.
    pub faces: Vec<FaceMatch>,
}

/// Stateless matcher bound to a threshold. Never persists anything.
#[derive(Debug, Clone)]
pub struct MatchingEngine<M: Matcher = CosineMatcher> {
    matcher: M,
    threshold: f32,
}

impl MatchingEngine<CosineMatcher> {
    pub fn new(threshold: f32) -> Self {
        Self::with_matcher(CosineMatcher, threshold)
    }
}

impl<M: Matcher> MatchingEngine<M> {
    pub fn with_matcher(matcher: M, threshold: f32) -> Self {
        Self { matcher, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Best roster identity for one embedding, or `Unknown`.
    pub fn match_face(&self, embedding: &Embedding, roster: &[Identity]) -> MatchResult {
        self.matcher.best_match(embedding, roster, self.threshold)
    }

    /// Re-embed each face crop from `image` and match it against `roster`.
    ///
    /// Zero-confidence detections are skipped. A crop the extractor cannot
    /// embed as a face is labelled Unknown; any other extractor failure
    /// aborts the pass.
    pub fn match_faces<E: EmbeddingExtractor + ?Sized>(
        &self,
        extractor: &mut E,
        image: &RgbImage,
        faces: &[DetectedFace],
        roster: &[Identity],
    ) -> Result<SessionMatches> {
        let mut session = SessionMatches::default();

        for face in faces.iter().filter(|f| f.confidence > 0.0) {
            let crop = crop_face(image, &face.region);
            let result = match extractor.embed(&crop) {
                Ok(embedding) => self.match_face(&embedding, roster),
                Err(ExtractError::NoFace) => {
                    tracing::debug!(x = face.region.x, y = face.region.y, "crop yielded no face");
                    MatchResult::unknown(0.0)
                }
                Err(e) => return Err(Error::Unexpected(e.to_string())),
            };

            if let Some(id) = &result.matched_identity_id {
                session.present.insert(id.clone());
            }
            tracing::debug!(label = %result.label, similarity = result.similarity, "face matched");
            session.faces.push(FaceMatch {
                region: face.region,
                confidence: face.confidence,
                result,
            });
        }

        Ok(session)
    }
}
