//! Anchor sources: landmark image sets with known ground-truth coordinates.
//!
//! A manifest lists sites; each site carries image references (HTTP URLs,
//! local paths, or a directory to scan). Fetches honor a per-request
//! timeout and a bounded exponential-backoff retry budget; a source that
//! keeps failing is skipped and logged, never allowed to stall the build.

use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use graticule_core::vector::cosine_similarity;
use graticule_core::{ReferenceKind, ReferenceVector};

use crate::anchors::curator::{select_diverse, CandidateScore};
use crate::embed::{EmbeddingExtractor, EmbeddingTier, FallbackPolicy};
use crate::error::{BuildError, BuildResult};

/// One landmark site with ground-truth coordinates and candidate imagery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSite {
    pub id: String,
    pub label: String,
    pub lat: f64,
    pub lon: f64,

    /// Image references: `http(s)://` URLs or local file paths.
    #[serde(default)]
    pub images: Vec<String>,

    /// Optional local directory scanned recursively for images.
    #[serde(default)]
    pub images_dir: Option<PathBuf>,
}

impl AnchorSite {
    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty id".to_string());
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range", self.lat));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("longitude {} out of range", self.lon));
        }
        Ok(())
    }

    /// All image references for the site, directory scans included, in a
    /// deterministic order.
    #[must_use]
    pub fn image_refs(&self) -> Vec<String> {
        let mut refs = self.images.clone();
        if let Some(dir) = &self.images_dir {
            let mut scanned: Vec<String> = WalkDir::new(dir)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file() && is_image_file(entry.path()))
                .map(|entry| entry.path().to_string_lossy().into_owned())
                .collect();
            scanned.sort();
            refs.extend(scanned);
        }
        refs
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| {
        matches!(
            ext.to_string_lossy().to_lowercase().as_ref(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        )
    })
}

/// A curated anchor source: a named collection of landmark sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorManifest {
    pub name: String,
    pub sites: Vec<AnchorSite>,
}

impl AnchorManifest {
    /// Load a manifest, rejecting invalid sites individually.
    pub fn load(path: &Path) -> BuildResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut manifest: Self = serde_json::from_str(&raw)?;

        let before = manifest.sites.len();
        manifest.sites.retain(|site| match site.validate() {
            Ok(()) => true,
            Err(reason) => {
                log::warn!("anchor site {} rejected: {reason}", site.id);
                false
            }
        });
        if manifest.sites.len() < before {
            log::warn!(
                "manifest {}: {} of {before} sites rejected",
                manifest.name,
                before - manifest.sites.len()
            );
        }

        Ok(manifest)
    }
}

/// Fetches anchor image bytes from HTTP or the local filesystem.
#[derive(Debug, Clone)]
pub struct AnchorFetcher {
    http: Client,
    retries: usize,
}

impl AnchorFetcher {
    /// Create a fetcher with the given per-request timeout and retry budget.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout_secs: u64, retries: usize) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("graticule/0.1.0 (https://github.com/graticule-dev/graticule)")
            .build()?;
        Ok(Self { http, retries })
    }

    /// Fetch one image reference. HTTP fetches retry with exponential
    /// backoff up to the configured budget; local paths are read directly.
    pub async fn fetch(&self, image_ref: &str) -> BuildResult<Vec<u8>> {
        if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
            let fetch_once = || async {
                let response = self.http.get(image_ref).send().await?;
                let response = response.error_for_status()?;
                Ok::<_, reqwest::Error>(response.bytes().await?.to_vec())
            };

            fetch_once
                .retry(ExponentialBuilder::default().with_max_times(self.retries))
                .await
                .map_err(|e| BuildError::source_fetch(image_ref, e.to_string()))
        } else {
            std::fs::read(image_ref)
                .map_err(|e| BuildError::source_fetch(image_ref, e.to_string()))
        }
    }
}

/// Fetch and embed every candidate image of a site at a pinned tier.
///
/// Candidates are scored by cosine similarity between the image embedding
/// and the site's own coordinate embedding; scoring happens after all
/// candidate embeddings are collected, so completion order never affects
/// selection. Individual failures are skipped and logged.
pub async fn collect_site_candidates(
    extractor: &EmbeddingExtractor,
    tier: EmbeddingTier,
    fetcher: &AnchorFetcher,
    site: &AnchorSite,
) -> Vec<CandidateScore> {
    let policy = FallbackPolicy::Pinned(tier);

    let coordinate_embedding = match extractor.embed_coordinates(site.lat, site.lon, policy) {
        Ok(embedding) => embedding.vector,
        Err(e) => {
            log::warn!("site {}: coordinate embedding failed: {e}", site.id);
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    for image_ref in site.image_refs() {
        let bytes = match fetcher.fetch(&image_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("site {}: skipping {image_ref}: {e}", site.id);
                continue;
            }
        };

        match extractor.embed_image_bytes(&bytes, policy) {
            Ok(embedding) => {
                let score = f64::from(cosine_similarity(
                    &embedding.vector,
                    &coordinate_embedding,
                ));
                candidates.push(CandidateScore {
                    source_ref: image_ref,
                    vector: embedding.vector,
                    score,
                });
            }
            Err(e) => {
                log::warn!("site {}: embedding {image_ref} failed: {e}", site.id);
            }
        }
    }

    candidates
}

/// Curate a site's candidates into anchor reference vectors.
#[must_use]
pub fn site_anchor_vectors(
    site: &AnchorSite,
    candidates: Vec<CandidateScore>,
    keep: usize,
) -> Vec<ReferenceVector> {
    select_diverse(candidates, keep)
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| {
            ReferenceVector::new(
                format!("anc:{}:{index}", site.id),
                site.label.clone(),
                site.lat,
                site.lon,
                ReferenceKind::Anchor,
                candidate.vector,
            )
        })
        .collect()
}

/// Collect all anchor vectors for one manifest.
///
/// Returns the vectors plus the number of sites that yielded nothing
/// (fetch or embed failures) for build diagnostics.
pub async fn collect_manifest_anchors(
    extractor: &EmbeddingExtractor,
    tier: EmbeddingTier,
    fetcher: &AnchorFetcher,
    manifest: &AnchorManifest,
    keep_per_site: usize,
) -> (Vec<ReferenceVector>, usize) {
    let mut vectors = Vec::new();
    let mut empty_sites = 0usize;

    for site in &manifest.sites {
        let candidates = collect_site_candidates(extractor, tier, fetcher, site).await;
        if candidates.is_empty() {
            log::warn!(
                "manifest {}: site {} produced no anchors",
                manifest.name,
                site.id
            );
            empty_sites += 1;
            continue;
        }
        vectors.extend(site_anchor_vectors(site, candidates, keep_per_site));
    }

    (vectors, empty_sites)
}
