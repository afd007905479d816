//! Confidence calibration: from a top-k hit set to a coordinate estimate,
//! an honest radius, a confidence tier, and the report-or-withhold
//! decision.
//!
//! Coordinate policy (deterministic, applied in this order): the
//! "contender" subset is every hit within `contender_delta` of the best
//! similarity; when the contenders' geographic spread is tight, the best
//! hit's own coordinate is reported, otherwise the similarity-weighted
//! spherical centroid of the contenders. The radius is the maximum
//! great-circle distance from the estimate to any contender, floored at
//! `min_radius_m`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use graticule_core::geo::{haversine_m, max_pairwise_distance_m, weighted_centroid};
use graticule_core::model::prediction::{
    CohortHint, ConfidenceTier, LocationEstimate, SceneType, Visibility,
};
use graticule_core::{Error, ReferenceKind};
use graticule_etl::EmbeddingTier;

use crate::retrieval::RetrievalHit;

/// Calibration thresholds, overridable from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Best similarity at or above which a tight hit set is High tier.
    #[serde(default = "default_high_similarity")]
    pub high_similarity: f64,

    /// Best similarity at or above which a loosely agreeing hit set is
    /// Medium tier.
    #[serde(default = "default_medium_similarity")]
    pub medium_similarity: f64,

    /// Contender spread (km) at or under which hits count as agreeing.
    #[serde(default = "default_tight_spread_km")]
    pub tight_spread_km: f64,

    /// Contender spread (km) at or under which agreement is partial.
    #[serde(default = "default_loose_spread_km")]
    pub loose_spread_km: f64,

    /// Radius floor so a tight top-k never implies false precision.
    #[serde(default = "default_min_radius_m")]
    pub min_radius_m: f64,

    /// Similarity distance from the best hit within which a hit is a
    /// contender for the coordinate estimate.
    #[serde(default = "default_contender_delta")]
    pub contender_delta: f64,
}

fn default_high_similarity() -> f64 {
    0.92
}
fn default_medium_similarity() -> f64 {
    0.78
}
fn default_tight_spread_km() -> f64 {
    75.0
}
fn default_loose_spread_km() -> f64 {
    1500.0
}
fn default_min_radius_m() -> f64 {
    10_000.0
}
fn default_contender_delta() -> f64 {
    0.05
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            high_similarity: default_high_similarity(),
            medium_similarity: default_medium_similarity(),
            tight_spread_km: default_tight_spread_km(),
            loose_spread_km: default_loose_spread_km(),
            min_radius_m: default_min_radius_m(),
            contender_delta: default_contender_delta(),
        }
    }
}

impl CalibrationConfig {
    /// Load threshold overrides from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::InvalidData(e.to_string()))
    }
}

/// A calibrated estimate, before diagnostics are attached.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub location: Option<LocationEstimate>,
    pub visibility: Visibility,
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub scene_type: SceneType,
    pub cohort_hint: CohortHint,
    pub explanation: String,
}

/// Turns top-k hit sets into calibrated predictions.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalibrator {
    config: CalibrationConfig,
}

impl ConfidenceCalibrator {
    #[must_use]
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Calibrate a hit set produced by an embedding of the given tier.
    ///
    /// `hits` must already be ordered by descending similarity (the
    /// retrieval engine's contract).
    #[must_use]
    pub fn calibrate(&self, hits: &[RetrievalHit], embedding_tier: EmbeddingTier) -> Calibration {
        let Some(best) = hits.first() else {
            return Calibration {
                location: None,
                visibility: Visibility::Withheld,
                confidence: 0.0,
                tier: ConfidenceTier::Low,
                scene_type: SceneType::Unknown,
                cohort_hint: CohortHint::GenericScene,
                explanation: "no reference matches".to_string(),
            };
        };

        let best_similarity = best.similarity;
        let contenders: Vec<&RetrievalHit> = hits
            .iter()
            .filter(|hit| hit.similarity >= best_similarity - self.config.contender_delta)
            .collect();

        let points: Vec<(f64, f64)> = contenders
            .iter()
            .map(|hit| (hit.reference.lat, hit.reference.lon))
            .collect();
        let spread_km = max_pairwise_distance_m(&points) / 1000.0;

        // Estimate: best hit when contenders agree, weighted spherical
        // centroid otherwise.
        let (lat, lon) = if spread_km <= self.config.tight_spread_km {
            (best.reference.lat, best.reference.lon)
        } else {
            let weights: Vec<f64> = contenders
                .iter()
                .map(|hit| hit.similarity.max(0.0))
                .collect();
            weighted_centroid(&points, &weights)
                .unwrap_or((best.reference.lat, best.reference.lon))
        };

        let radius_m = points
            .iter()
            .map(|&(p_lat, p_lon)| haversine_m(lat, lon, p_lat, p_lon))
            .fold(0.0, f64::max)
            .max(self.config.min_radius_m);

        let uncapped_tier = if best_similarity >= self.config.high_similarity
            && spread_km <= self.config.tight_spread_km
        {
            ConfidenceTier::High
        } else if best_similarity >= self.config.high_similarity
            || (best_similarity >= self.config.medium_similarity
                && spread_km <= self.config.loose_spread_km)
        {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        };

        // The statistical fallback may answer, never with High confidence.
        let tier_cap = match embedding_tier {
            EmbeddingTier::Primary | EmbeddingTier::Secondary => ConfidenceTier::High,
            EmbeddingTier::Deterministic => ConfidenceTier::Medium,
        };
        let tier = uncapped_tier.min(tier_cap);

        let agreement = if spread_km <= self.config.tight_spread_km {
            1.0
        } else if spread_km <= self.config.loose_spread_km {
            0.8
        } else {
            0.5
        };
        let tier_factor = match embedding_tier {
            EmbeddingTier::Primary => 1.0,
            EmbeddingTier::Secondary => 0.9,
            EmbeddingTier::Deterministic => 0.6,
        };
        let confidence = (best_similarity.clamp(0.0, 1.0) * agreement * tier_factor).clamp(0.0, 1.0);

        let (scene_type, cohort_hint) = classify_scene(&contenders);

        let mut explanation = format!(
            "best similarity {best_similarity:.3} over {} contender(s), spread {spread_km:.0} km",
            contenders.len()
        );
        if tier < uncapped_tier {
            explanation.push_str(&format!(
                "; capped by {} embedding tier",
                embedding_tier.tag()
            ));
        }

        let visibility = if tier == ConfidenceTier::Low {
            Visibility::Withheld
        } else {
            Visibility::Visible
        };
        let location = (visibility == Visibility::Visible).then_some(LocationEstimate {
            lat,
            lon,
            radius_m,
        });

        Calibration {
            location,
            visibility,
            confidence,
            tier,
            scene_type,
            cohort_hint,
            explanation,
        }
    }
}

/// Scene and cohort from the winning subset. Explanatory only; never
/// overrides the numeric tier.
fn classify_scene(contenders: &[&RetrievalHit]) -> (SceneType, CohortHint) {
    let mut anchor_weight = 0.0_f64;
    let mut lattice_weight = 0.0_f64;
    for hit in contenders {
        let weight = hit.similarity.max(0.0);
        match hit.reference.kind {
            ReferenceKind::Anchor => anchor_weight += weight,
            ReferenceKind::Lattice => lattice_weight += weight,
        }
    }

    if anchor_weight > 0.0 && anchor_weight >= lattice_weight {
        return (SceneType::Landmark, CohortHint::IconicLandmark);
    }

    let scene = contenders
        .iter()
        .find(|hit| hit.reference.kind == ReferenceKind::Lattice)
        .map_or(SceneType::Unknown, |hit| {
            let id = hit.reference.id.as_str();
            if id.contains(":hot-nature-") {
                SceneType::Nature
            } else if id.contains(":hot-") {
                SceneType::Urban
            } else if id.contains(":grid-") {
                SceneType::Rural
            } else {
                SceneType::Unknown
            }
        });
    (scene, CohortHint::GenericScene)
}
