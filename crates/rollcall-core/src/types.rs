use serde::{Deserialize, Serialize};

/// Default cosine similarity a probe must strictly exceed to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.68;
/// Default cosine similarity above which two faces are the same person at registration.
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.80;

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Serializes as a bare list of numbers, e.g. `[0.12, -0.03, ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// A zero vector is similar to nothing (0.0).
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// Axis-aligned face region in pixel coordinates, clamped to its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Build a region from floating-point detector output, clamped to `bounds`.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clamped(x: f32, y: f32, width: f32, height: f32, bounds: (u32, u32)) -> Option<Self> {
        let (img_w, img_h) = bounds;
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let x0 = x.max(0.0).floor() as u32;
        let y0 = y.max(0.0).floor() as u32;
        let x1 = ((x + width).ceil().max(0.0) as u32).min(img_w);
        let y1 = ((y + height).ceil().max(0.0) as u32).min(img_h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// A face found in an image by the extractor. Never persisted.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub confidence: f32,
    pub embedding: Embedding,
}

/// A registered person: the unit the registry stores and the ledger reports on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// `{id, name}` view of an identity, without the embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub id: String,
    pub name: String,
}

impl From<&Identity> for IdentitySummary {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.display_name.clone(),
        }
    }
}

/// Similarity thresholds for a deployment.
///
/// `duplicate` is deliberately stricter than `matching`: registration should
/// only reject a face that is very likely the same person.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub matching: f32,
    pub duplicate: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            matching: DEFAULT_MATCH_THRESHOLD,
            duplicate: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }
}

/// Result of matching one probe embedding against the roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// ID of the matched identity, `None` if nothing cleared the threshold.
    pub matched_identity_id: Option<String>,
    /// Best similarity observed [-1, 1]; 0.0 when the roster was empty.
    pub similarity: f32,
    /// Annotation label: `"<name> (<similarity>)"` or `"Unknown"`.
    pub label: String,
}

impl MatchResult {
    pub const UNKNOWN_LABEL: &'static str = "Unknown";

    pub fn matched(identity: &Identity, similarity: f32) -> Self {
        Self {
            matched_identity_id: Some(identity.id.clone()),
            similarity,
            label: format!("{} ({similarity:.2})", identity.display_name),
        }
    }

    pub fn unknown(similarity: f32) -> Self {
        Self {
            matched_identity_id: None,
            similarity,
            label: Self::UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched_identity_id.is_some()
    }
}

/// First registered identity whose embedding exceeded the duplicate threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateHit {
    pub id: String,
    pub name: String,
    pub similarity: f32,
}
