//! Roster search policy.
//!
//! Two scans with deliberately different rules:
//! - matching keeps the maximum similarity that strictly exceeds the threshold,
//!   ties going to the earliest-registered identity;
//! - the duplicate check returns the first identity, in registration order,
//!   whose similarity strictly exceeds the (stricter) duplicate threshold.

use crate::types::{DuplicateHit, Embedding, Identity, MatchResult};

/// Strategy for searching a roster of registered identities.
///
/// The roster slice is always in registration order; implementations that
/// index it differently must still honour that order for tie-breaks.
pub trait Matcher {
    /// Best identity for `probe` whose similarity is strictly above `threshold`.
    fn best_match(&self, probe: &Embedding, roster: &[Identity], threshold: f32) -> MatchResult;

    /// First identity whose similarity to `probe` is strictly above `threshold`.
    fn first_duplicate(
        &self,
        probe: &Embedding,
        roster: &[Identity],
        threshold: f32,
    ) -> Option<DuplicateHit>;
}

/// Linear cosine-similarity scan over the whole roster.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, roster: &[Identity], threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;
        let mut best_seen: Option<f32> = None;

        for (i, identity) in roster.iter().enumerate() {
            let sim = probe.similarity(&identity.embedding);
            if best_seen.map_or(true, |s| sim > s) {
                best_seen = Some(sim);
            }
            // Strict improvement only: an equal later score never displaces
            // an earlier registration.
            if sim > threshold && best.map_or(true, |(_, b)| sim > b) {
                best = Some((i, sim));
            }
        }

        match best {
            Some((idx, sim)) => MatchResult::matched(&roster[idx], sim),
            None => MatchResult::unknown(best_seen.unwrap_or(0.0)),
        }
    }

    fn first_duplicate(
        &self,
        probe: &Embedding,
        roster: &[Identity],
        threshold: f32,
    ) -> Option<DuplicateHit> {
        roster.iter().find_map(|identity| {
            let sim = probe.similarity(&identity.embedding);
            (sim > threshold).then(|| DuplicateHit {
                id: identity.id.clone(),
                name: identity.display_name.clone(),
                similarity: sim,
            })
        })
    }
}
