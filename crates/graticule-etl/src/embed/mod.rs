//! Embedding extraction with a degrading fallback chain.
//!
//! Backends are ordered tiers: the primary vision-geolocation model, a
//! general-purpose vision-language model, and a deterministic statistical
//! fallback. The chain policy is explicit and owned by the caller level —
//! a backend failure is surfaced to the policy, never silently swallowed —
//! and the winning tier travels with every embedding so downstream
//! calibration can discount degraded results.

#[cfg(feature = "clip")]
pub mod clip;
pub mod deterministic;
pub mod prep;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use graticule_core::vector::{is_unit_norm, l2_normalize};
use graticule_core::EMBEDDING_DIM;

use crate::error::EmbedError;

pub use deterministic::DeterministicBackend;
pub use prep::PreparedImage;

/// Which backend produced an embedding.
///
/// Ordered from most to least trusted; the tag strings are the values that
/// appear in prediction diagnostics and cache signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EmbeddingTier {
    /// The vision-geolocation model.
    Primary,
    /// A general-purpose vision-language model with a compatible dimension.
    Secondary,
    /// The statistical fallback.
    Deterministic,
}

impl EmbeddingTier {
    /// Diagnostic tag (`geoclip` | `clip` | `fallback`).
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Primary => "geoclip",
            Self::Secondary => "clip",
            Self::Deterministic => "fallback",
        }
    }
}

impl fmt::Display for EmbeddingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Contract every embedding backend fulfills: image bytes or a coordinate
/// pair in, a [`EMBEDDING_DIM`]-component vector out.
pub trait EmbeddingBackend: Send + Sync + fmt::Debug {
    fn tier(&self) -> EmbeddingTier;

    fn embed_image(&self, image: &PreparedImage) -> Result<Vec<f32>, EmbedError>;

    fn embed_coordinates(&self, lat: f64, lon: f64) -> Result<Vec<f32>, EmbedError>;
}

/// The explicit degradation policy: which tiers to attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Primary, then secondary, then deterministic.
    Accurate,
    /// Primary, then deterministic — skips the expensive secondary attempt.
    Fast,
    /// A single tier, no degradation. Used by the index builder so a store
    /// is never mixed-tier.
    Pinned(EmbeddingTier),
}

impl FallbackPolicy {
    /// Tiers to attempt, most trusted first.
    #[must_use]
    pub fn attempt_order(self) -> &'static [EmbeddingTier] {
        match self {
            Self::Accurate => &[
                EmbeddingTier::Primary,
                EmbeddingTier::Secondary,
                EmbeddingTier::Deterministic,
            ],
            Self::Fast => &[EmbeddingTier::Primary, EmbeddingTier::Deterministic],
            Self::Pinned(EmbeddingTier::Primary) => &[EmbeddingTier::Primary],
            Self::Pinned(EmbeddingTier::Secondary) => &[EmbeddingTier::Secondary],
            Self::Pinned(EmbeddingTier::Deterministic) => &[EmbeddingTier::Deterministic],
        }
    }

    /// The tier the policy would try after `failed`, if any.
    #[must_use]
    pub fn next_tier(self, failed: EmbeddingTier) -> Option<EmbeddingTier> {
        let order = self.attempt_order();
        order
            .iter()
            .position(|&t| t == failed)
            .and_then(|i| order.get(i + 1))
            .copied()
    }
}

/// A finished embedding: the unit-normalized vector plus the tier that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tier: EmbeddingTier,
}

/// Owns the backend registry and walks the fallback chain.
///
/// An explicit service object, not a module singleton: tests construct
/// isolated extractors with whatever backends they need.
#[derive(Debug)]
pub struct EmbeddingExtractor {
    backends: Vec<Arc<dyn EmbeddingBackend>>,
}

impl EmbeddingExtractor {
    /// Build an extractor from an explicit backend registry.
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn EmbeddingBackend>>) -> Self {
        Self { backends }
    }

    /// The standard registry: CLIP-based tiers when the `clip` feature is
    /// compiled in and their weights exist under `model_dir`, plus the
    /// always-available deterministic fallback.
    #[must_use]
    pub fn with_default_backends(model_dir: &Path) -> Self {
        let mut backends: Vec<Arc<dyn EmbeddingBackend>> = Vec::new();

        #[cfg(feature = "clip")]
        {
            match clip::GeoClipBackend::load(model_dir) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(e) => log::warn!("primary backend unavailable: {e}"),
            }
            match clip::ClipBackend::load(model_dir) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(e) => log::warn!("secondary backend unavailable: {e}"),
            }
        }
        #[cfg(not(feature = "clip"))]
        {
            log::debug!(
                "clip feature disabled; model_dir {} unused",
                model_dir.display()
            );
        }

        backends.push(Arc::new(DeterministicBackend::new()));
        Self { backends }
    }

    fn backend_for(&self, tier: EmbeddingTier) -> Option<&Arc<dyn EmbeddingBackend>> {
        self.backends.iter().find(|b| b.tier() == tier)
    }

    /// The most trusted tier the policy permits that has a registered
    /// backend. This is the tier an index build pins for its whole catalog.
    pub fn resolve_tier(&self, policy: FallbackPolicy) -> Result<EmbeddingTier, EmbedError> {
        policy
            .attempt_order()
            .iter()
            .copied()
            .find(|&t| self.backend_for(t).is_some())
            .ok_or(EmbedError::Exhausted)
    }

    /// Decode image bytes and embed them, walking the fallback chain.
    pub fn embed_image_bytes(
        &self,
        bytes: &[u8],
        policy: FallbackPolicy,
    ) -> Result<Embedding, EmbedError> {
        let image = prep::prepare_image(bytes)?;
        self.embed_prepared(&image, policy)
    }

    /// Embed an already-prepared image, walking the fallback chain.
    pub fn embed_prepared(
        &self,
        image: &PreparedImage,
        policy: FallbackPolicy,
    ) -> Result<Embedding, EmbedError> {
        self.walk_chain(policy, |backend| backend.embed_image(image))
    }

    /// Embed a coordinate pair, walking the fallback chain.
    pub fn embed_coordinates(
        &self,
        lat: f64,
        lon: f64,
        policy: FallbackPolicy,
    ) -> Result<Embedding, EmbedError> {
        self.walk_chain(policy, |backend| backend.embed_coordinates(lat, lon))
    }

    fn walk_chain<F>(&self, policy: FallbackPolicy, mut embed: F) -> Result<Embedding, EmbedError>
    where
        F: FnMut(&dyn EmbeddingBackend) -> Result<Vec<f32>, EmbedError>,
    {
        let mut last_error = None;

        for &tier in policy.attempt_order() {
            let Some(backend) = self.backend_for(tier) else {
                last_error = Some(EmbedError::ModelUnavailable {
                    backend: tier.tag(),
                    reason: "backend not registered".to_string(),
                });
                continue;
            };

            match embed(backend.as_ref()) {
                Ok(vector) => return finalize(tier, vector),
                Err(e) if e.is_recoverable() && policy.next_tier(tier).is_some() => {
                    log::warn!("backend {} degraded: {e}", tier.tag());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(EmbedError::Exhausted))
    }
}

/// Enforce the dimension contract and the unit-norm invariant.
fn finalize(tier: EmbeddingTier, mut vector: Vec<f32>) -> Result<Embedding, EmbedError> {
    if vector.len() != EMBEDDING_DIM {
        return Err(EmbedError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: vector.len(),
        });
    }
    l2_normalize(&mut vector);
    if !is_unit_norm(&vector) {
        return Err(EmbedError::Backend {
            backend: tier.tag(),
            message: "degenerate zero-norm embedding".to_string(),
        });
    }
    Ok(Embedding { vector, tier })
}
