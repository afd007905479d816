//! Near-duplicate-aware candidate selection.
//!
//! When many photos exist for one landmark, only a bounded, diverse subset
//! becomes anchors — an index flooded with near-identical shots of one
//! facade would drown out everything else. Selection is two-phase:
//! diversity-first under a cosine ceiling, then backfill by score so the
//! quota is still met when the pool is homogeneous.

use graticule_core::vector::cosine_similarity;

/// Cosine similarity at or above which two candidates count as
/// near-duplicates during the diversity phase.
pub const NEAR_DUPLICATE_THRESHOLD: f32 = 0.995;

/// A scored candidate image for a single target location. Transient; never
/// persisted.
#[derive(Debug, Clone)]
pub struct CandidateScore {
    /// Source URL or path, also the deterministic tie-break key.
    pub source_ref: String,
    pub vector: Vec<f32>,
    pub score: f64,
}

/// Select up to `keep` diverse candidates.
///
/// Candidates are sorted by descending score with lexical `source_ref`
/// tie-break, then accepted greedily while their cosine similarity to every
/// already-accepted candidate stays below [`NEAR_DUPLICATE_THRESHOLD`]. If
/// the diversity phase yields fewer than `keep`, the highest-scoring
/// rejects backfill the quota regardless of similarity.
///
/// Deterministic for a given candidate set, independent of input order.
#[must_use]
pub fn select_diverse(mut candidates: Vec<CandidateScore>, keep: usize) -> Vec<CandidateScore> {
    if keep == 0 || candidates.is_empty() {
        return Vec::new();
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_ref.cmp(&b.source_ref))
    });

    let mut accepted: Vec<CandidateScore> = Vec::with_capacity(keep);
    let mut rejected: Vec<CandidateScore> = Vec::new();

    for candidate in candidates {
        if accepted.len() >= keep {
            break;
        }
        let near_duplicate = accepted
            .iter()
            .any(|a| cosine_similarity(&a.vector, &candidate.vector) >= NEAR_DUPLICATE_THRESHOLD);
        if near_duplicate {
            rejected.push(candidate);
        } else {
            accepted.push(candidate);
        }
    }

    // Backfill: rejected is already in score order.
    for candidate in rejected {
        if accepted.len() >= keep {
            break;
        }
        accepted.push(candidate);
    }

    accepted
}
