//! Coordinate-lattice generation and embedding.
//!
//! The lattice is a stratified Fibonacci sampling of the globe with extra
//! density at configured population hotspots. Generation is deterministic:
//! the same catalog and target always yield the same points in the same
//! order.

use std::sync::Arc;

use treadle::{Stage, StageContext, StageOutcome};

use graticule_core::cache::CacheEnvelope;
use graticule_core::model::catalog::{load_catalog, CatalogEntry};
use graticule_core::vector::l2_normalize;
use graticule_core::{ReferenceKind, ReferenceVector};

use crate::config::Config;
use crate::embed::deterministic::DeterministicBackend;
use crate::embed::{EmbeddingExtractor, EmbeddingTier, FallbackPolicy};
use crate::error::BuildResult;

/// Golden angle in radians, for both the sphere spiral and hotspot rings.
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Cap on extra points a single hotspot may contribute.
const MAX_HOTSPOT_EXTRA: usize = 12;

/// Generate the coordinate lattice: hotspot expansions first, then a
/// Fibonacci-sphere grid filling up to `target` points.
#[must_use]
pub fn generate_lattice(target: usize, hotspots: &[CatalogEntry]) -> Vec<CatalogEntry> {
    let mut points = Vec::with_capacity(target);

    for entry in hotspots {
        if points.len() >= target {
            break;
        }
        let category = entry
            .category
            .clone()
            .unwrap_or_else(|| "urban".to_string());

        points.push(CatalogEntry {
            id: format!("hot-{category}-{}", entry.id),
            label: entry.label.clone(),
            lat: entry.lat,
            lon: entry.lon,
            weight: entry.weight,
            category: Some(category.clone()),
        });

        // Extra ring points proportional to the hotspot weight.
        let extra = entry
            .weight
            .unwrap_or(1.0)
            .round()
            .max(0.0) as usize;
        for j in 0..extra.min(MAX_HOTSPOT_EXTRA) {
            if points.len() >= target {
                break;
            }
            let theta = j as f64 * GOLDEN_ANGLE;
            let radius = 0.05 + 0.04 * j as f64;
            let lat = (entry.lat + radius * theta.cos()).clamp(-90.0, 90.0);
            let mut lon = entry.lon + radius * theta.sin() / entry.lat.to_radians().cos().max(0.1);
            if lon > 180.0 {
                lon -= 360.0;
            } else if lon < -180.0 {
                lon += 360.0;
            }
            points.push(CatalogEntry {
                id: format!("hot-{category}-{}-{j}", entry.id),
                label: entry.label.clone(),
                lat,
                lon,
                weight: None,
                category: Some(category.clone()),
            });
        }
    }

    let grid_count = target.saturating_sub(points.len());
    for i in 0..grid_count {
        let z = 1.0 - 2.0 * (i as f64 + 0.5) / grid_count as f64;
        let lat = z.asin().to_degrees();
        let mut lon = ((i as f64 * GOLDEN_ANGLE).rem_euclid(std::f64::consts::TAU)
            - std::f64::consts::PI)
            .to_degrees();
        // Guard the exact boundary after degree conversion.
        if lon > 180.0 {
            lon -= 360.0;
        }
        points.push(CatalogEntry {
            id: format!("grid-{i}"),
            label: "grid".to_string(),
            lat,
            lon,
            weight: None,
            category: None,
        });
    }

    points
}

/// Embed lattice points at a pinned tier.
///
/// Returns the reference vectors plus the count of entries whose embedding
/// failed and was synthesized deterministically as a last resort for
/// coverage.
pub fn embed_lattice(
    extractor: &EmbeddingExtractor,
    tier: EmbeddingTier,
    entries: &[CatalogEntry],
) -> BuildResult<(Vec<ReferenceVector>, usize)> {
    let mut vectors = Vec::with_capacity(entries.len());
    let mut synthesized = 0usize;
    let synth = DeterministicBackend::new();

    for entry in entries {
        let vector = match extractor.embed_coordinates(
            entry.lat,
            entry.lon,
            FallbackPolicy::Pinned(tier),
        ) {
            Ok(embedding) => embedding.vector,
            Err(e) => {
                log::warn!(
                    "lattice point {} failed to embed ({e}); synthesizing fallback vector",
                    entry.id
                );
                synthesized += 1;
                let mut v = synth.project_coordinates(entry.lat, entry.lon);
                l2_normalize(&mut v);
                v
            }
        };

        vectors.push(ReferenceVector::new(
            format!("lat:{}", entry.id),
            entry.label.clone(),
            entry.lat,
            entry.lon,
            ReferenceKind::Lattice,
            vector,
        ));
    }

    Ok((vectors, synthesized))
}

/// The Lattice stage: generate the coordinate catalog and embed it into the
/// intermediate lattice envelope.
#[derive(Debug)]
pub struct LatticeStage {
    config: Config,
    extractor: Arc<EmbeddingExtractor>,
}

impl LatticeStage {
    #[must_use]
    pub fn new(config: Config, extractor: Arc<EmbeddingExtractor>) -> Self {
        Self { config, extractor }
    }

    async fn run(&self) -> BuildResult<usize> {
        let tier = self.extractor.resolve_tier(FallbackPolicy::Accurate)?;
        let signature = self.config.build_signature(tier.tag()).render();
        let path = self.config.lattice_envelope_path(&signature);

        if path.exists() {
            log::info!("lattice envelope up to date: {}", path.display());
            return Ok(0);
        }

        let hotspots = match &self.config.catalog_path {
            Some(catalog) => load_catalog(catalog)?.entries,
            None => Vec::new(),
        };

        let entries = generate_lattice(self.config.lattice_target, &hotspots);
        log::info!(
            "embedding {} lattice points at tier {}",
            entries.len(),
            tier.tag()
        );

        let extractor = Arc::clone(&self.extractor);
        let (vectors, synthesized) =
            tokio::task::spawn_blocking(move || embed_lattice(&extractor, tier, &entries))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;

        if synthesized > 0 {
            log::warn!("{synthesized} lattice points used synthesized fallback vectors");
        }

        let count = vectors.len();
        CacheEnvelope::new(signature, tier.tag(), vectors).save(&path)?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl Stage for LatticeStage {
    fn name(&self) -> &str {
        "lattice"
    }

    async fn execute(
        &self,
        _item: &dyn treadle::WorkItem,
        _context: &mut StageContext,
    ) -> treadle::Result<StageOutcome> {
        log::info!("Starting lattice build ({} target)", self.config.lattice_target);

        match self.run().await {
            Ok(count) => {
                log::info!("Lattice build complete: {count} points embedded");
                Ok(StageOutcome::Complete)
            }
            Err(e) => Err(treadle::TreadleError::StageExecution(format!(
                "Lattice build failed: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::DeterministicBackend as Det;
    use graticule_core::vector::is_unit_norm;

    fn hotspot(id: &str, lat: f64, lon: f64, weight: f64) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            label: id.to_string(),
            lat,
            lon,
            weight: Some(weight),
            category: None,
        }
    }

    #[test]
    fn test_generate_lattice_hits_target_count() {
        let points = generate_lattice(100, &[]);
        assert_eq!(points.len(), 100);
        assert!(points.iter().all(|p| (-90.0..=90.0).contains(&p.lat)));
        assert!(points.iter().all(|p| (-180.0..=180.0).contains(&p.lon)));
    }

    #[test]
    fn test_generate_lattice_is_deterministic() {
        let a = generate_lattice(64, &[hotspot("paris", 48.85, 2.35, 3.0)]);
        let b = generate_lattice(64, &[hotspot("paris", 48.85, 2.35, 3.0)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_lattice_densifies_hotspots() {
        let points = generate_lattice(200, &[hotspot("tokyo", 35.68, 139.69, 5.0)]);
        let near_tokyo = points
            .iter()
            .filter(|p| (p.lat - 35.68).abs() < 1.0 && (p.lon - 139.69).abs() < 1.0)
            .count();
        // Center plus five ring points.
        assert!(near_tokyo >= 6, "got {near_tokyo}");
        assert!(points.iter().any(|p| p.id.starts_with("hot-urban-tokyo")));
    }

    #[test]
    fn test_generate_lattice_respects_target_over_hotspots() {
        let hotspots: Vec<CatalogEntry> = (0..50)
            .map(|i| hotspot(&format!("h{i}"), 10.0, 10.0, 6.0))
            .collect();
        let points = generate_lattice(20, &hotspots);
        assert_eq!(points.len(), 20);
    }

    #[test]
    fn test_embed_lattice_produces_valid_reference_vectors() {
        let extractor = EmbeddingExtractor::new(vec![std::sync::Arc::new(Det::new())]);
        let entries = generate_lattice(16, &[]);
        let (vectors, synthesized) =
            embed_lattice(&extractor, EmbeddingTier::Deterministic, &entries).expect("embed");

        assert_eq!(vectors.len(), 16);
        assert_eq!(synthesized, 0);
        for v in &vectors {
            assert!(v.validate().is_ok());
            assert!(is_unit_norm(&v.vector));
            assert_eq!(v.kind, ReferenceKind::Lattice);
            assert!(v.id.starts_with("lat:grid-"));
        }
    }
}
