//! The cached reference-index builder.
//!
//! `build()` is idempotent twice over: a `tokio::sync::OnceCell` guarantees
//! N concurrent first callers trigger exactly one in-process build, and the
//! version-gated cache envelope makes process restarts cheap. The whole
//! catalog embeds at a single resolved tier — mixing tiers within one store
//! would corrupt similarity comparisons — and partial builds are never
//! published.

use std::sync::Arc;

use graticule_core::cache::CacheEnvelope;
use graticule_core::model::catalog::load_catalog;
use graticule_core::VectorStore;

use crate::anchors::source::{collect_manifest_anchors, AnchorFetcher, AnchorManifest};
use crate::config::Config;
use crate::embed::{EmbeddingExtractor, FallbackPolicy};
use crate::error::{BuildError, BuildResult};
use crate::lattice::{embed_lattice, generate_lattice};

/// Where a built index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Loaded from a version-matched cache envelope.
    Cache,
    /// Built fresh this process.
    Built,
}

/// Build provenance carried into prediction diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProvenance {
    pub source: IndexSource,
    /// Diagnostic tag of the tier the store was embedded with.
    pub embedding_source: String,
    pub lattice_count: usize,
    pub anchor_count: usize,
    /// Lattice points that fell back to synthesized coverage vectors.
    pub synthesized: usize,
}

impl IndexProvenance {
    /// The `reference_index_source` diagnostics string.
    #[must_use]
    pub fn reference_index_source(&self) -> String {
        let base = match self.source {
            IndexSource::Cache => "cache",
            IndexSource::Built => "built",
        };
        if self.anchor_count == 0 {
            format!("{base}:lattice_only")
        } else {
            base.to_string()
        }
    }
}

/// A finished build: the immutable store plus its provenance and signature.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub store: Arc<VectorStore>,
    pub provenance: IndexProvenance,
    pub signature: String,
}

/// Builds (or loads) the merged reference store exactly once.
#[derive(Debug)]
pub struct ReferenceIndexBuilder {
    config: Config,
    extractor: Arc<EmbeddingExtractor>,
    cell: tokio::sync::OnceCell<BuiltIndex>,
}

impl ReferenceIndexBuilder {
    #[must_use]
    pub fn new(config: Config, extractor: Arc<EmbeddingExtractor>) -> Self {
        Self {
            config,
            extractor,
            cell: tokio::sync::OnceCell::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn extractor(&self) -> &Arc<EmbeddingExtractor> {
        &self.extractor
    }

    /// The signature the next build would carry.
    pub fn signature(&self) -> BuildResult<String> {
        let tier = self.extractor.resolve_tier(FallbackPolicy::Accurate)?;
        Ok(self.config.build_signature(tier.tag()).render())
    }

    /// Build or load the reference store. Concurrent first callers block on
    /// one build; later callers get the memoized result with no duplicate
    /// embedding work.
    pub async fn build(&self) -> BuildResult<BuiltIndex> {
        self.cell
            .get_or_try_init(|| self.build_inner(false))
            .await
            .cloned()
    }

    /// Build from scratch, ignoring the on-disk envelope. Does not touch
    /// the memoized result: callers (the retrieval engine's rebuild path)
    /// swap their snapshot only after this completes.
    pub async fn build_fresh(&self) -> BuildResult<BuiltIndex> {
        self.build_inner(true).await
    }

    async fn build_inner(&self, force: bool) -> BuildResult<BuiltIndex> {
        let tier = self.extractor.resolve_tier(FallbackPolicy::Accurate)?;
        let signature = self.config.build_signature(tier.tag()).render();
        let envelope_path = self.config.reference_envelope_path(&signature);

        if !force && envelope_path.exists() {
            match CacheEnvelope::load(&envelope_path, &signature) {
                Ok(envelope) => match envelope.into_store() {
                    Ok(store) if store.is_empty() => {
                        log::warn!("cached store is empty; rebuilding");
                    }
                    Ok(store) => {
                        log::info!(
                            "reference store loaded from cache ({} vectors)",
                            store.len()
                        );
                        let store = Arc::new(store);
                        return Ok(BuiltIndex {
                            provenance: IndexProvenance {
                                source: IndexSource::Cache,
                                embedding_source: tier.tag().to_string(),
                                lattice_count: store.lattice_count(),
                                anchor_count: store.anchor_count(),
                                synthesized: 0,
                            },
                            signature,
                            store,
                        });
                    }
                    Err(e) => log::warn!("cached store invalid ({e}); rebuilding"),
                },
                Err(e) => log::warn!("reference cache unusable ({e}); rebuilding"),
            }
        }

        log::info!("building reference store at tier {}", tier.tag());

        // Lattice pass: the whole catalog embeds at the resolved tier.
        let hotspots = match &self.config.catalog_path {
            Some(path) => load_catalog(path)?.entries,
            None => Vec::new(),
        };
        let entries = generate_lattice(self.config.lattice_target, &hotspots);
        let extractor = Arc::clone(&self.extractor);
        let (lattice_vectors, synthesized) =
            tokio::task::spawn_blocking(move || embed_lattice(&extractor, tier, &entries))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;

        // Anchor pass: failing sources are skipped, never fatal.
        let mut anchor_vectors = Vec::new();
        if !self.config.anchor_manifests.is_empty() {
            let fetcher = AnchorFetcher::new(
                self.config.anchor_fetch_timeout_secs,
                self.config.anchor_fetch_retries,
            )
            .map_err(|e| BuildError::source_fetch("anchor-fetcher", e.to_string()))?;

            for manifest_path in &self.config.anchor_manifests {
                let manifest = match AnchorManifest::load(manifest_path) {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        log::warn!(
                            "anchor manifest {} skipped: {e}",
                            manifest_path.display()
                        );
                        continue;
                    }
                };
                let (vectors, empty_sites) = collect_manifest_anchors(
                    &self.extractor,
                    tier,
                    &fetcher,
                    &manifest,
                    self.config.anchors_per_site,
                )
                .await;
                if empty_sites > 0 {
                    log::warn!(
                        "manifest {}: {empty_sites} sites yielded no anchors",
                        manifest.name
                    );
                }
                anchor_vectors.extend(vectors);
            }
        }

        let mut all = lattice_vectors;
        all.extend(anchor_vectors);
        if all.is_empty() {
            return Err(BuildError::NoReferenceVectors);
        }

        let store = Arc::new(VectorStore::from_vectors(all)?);
        CacheEnvelope::new(&signature, tier.tag(), store.vectors().to_vec())
            .save(&envelope_path)?;

        let provenance = IndexProvenance {
            source: IndexSource::Built,
            embedding_source: tier.tag().to_string(),
            lattice_count: store.lattice_count(),
            anchor_count: store.anchor_count(),
            synthesized,
        };
        if provenance.anchor_count == 0 {
            log::info!(
                "reference store built: {} lattice points, lattice-only",
                provenance.lattice_count
            );
        } else {
            log::info!(
                "reference store built: {} lattice points, {} anchors",
                provenance.lattice_count,
                provenance.anchor_count
            );
        }

        Ok(BuiltIndex {
            store,
            provenance,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{
        DeterministicBackend, EmbeddingBackend, EmbeddingTier, PreparedImage,
    };
    use crate::error::EmbedError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Deterministic backend wrapped with an embed-call counter.
    #[derive(Debug)]
    struct CountingBackend {
        inner: DeterministicBackend,
        calls: Arc<AtomicUsize>,
    }

    impl CountingBackend {
        fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    inner: DeterministicBackend::new(),
                    calls: Arc::clone(&calls),
                }),
                calls,
            )
        }
    }

    impl EmbeddingBackend for CountingBackend {
        fn tier(&self) -> EmbeddingTier {
            EmbeddingTier::Deterministic
        }
        fn embed_image(&self, image: &PreparedImage) -> Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_image(image)
        }
        fn embed_coordinates(&self, lat: f64, lon: f64) -> Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_coordinates(lat, lon)
        }
    }

    fn test_builder(dir: &TempDir) -> (ReferenceIndexBuilder, Arc<AtomicUsize>) {
        let (backend, calls) = CountingBackend::new();
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            lattice_target: 12,
            ..Config::default()
        };
        let extractor = Arc::new(EmbeddingExtractor::new(vec![backend]));
        (ReferenceIndexBuilder::new(config, extractor), calls)
    }

    #[tokio::test]
    async fn test_build_is_lattice_only_without_manifests() {
        let dir = TempDir::new().expect("tempdir");
        let (builder, _) = test_builder(&dir);

        let built = builder.build().await.expect("build");
        assert_eq!(built.store.len(), 12);
        assert_eq!(built.store.anchor_count(), 0);
        assert_eq!(built.provenance.source, IndexSource::Built);
        assert_eq!(
            built.provenance.reference_index_source(),
            "built:lattice_only"
        );
    }

    #[tokio::test]
    async fn test_build_twice_does_no_duplicate_embedding_work() {
        let dir = TempDir::new().expect("tempdir");
        let (builder, calls) = test_builder(&dir);

        let first = builder.build().await.expect("build");
        let after_first = calls.load(Ordering::SeqCst);
        assert!(after_first >= 12);

        let second = builder.build().await.expect("build");
        assert_eq!(calls.load(Ordering::SeqCst), after_first);
        assert_eq!(first.signature, second.signature);
        assert_eq!(first.store.len(), second.store.len());
    }

    #[tokio::test]
    async fn test_concurrent_first_builds_collapse_to_one() {
        let dir = TempDir::new().expect("tempdir");
        let (builder, calls) = test_builder(&dir);
        let builder = Arc::new(builder);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let builder = Arc::clone(&builder);
            handles.push(tokio::spawn(async move { builder.build().await }));
        }
        for handle in handles {
            handle.await.expect("join").expect("build");
        }

        // One lattice pass: exactly 12 coordinate embeds.
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_new_process_loads_from_envelope_cache() {
        let dir = TempDir::new().expect("tempdir");
        {
            let (builder, _) = test_builder(&dir);
            builder.build().await.expect("build");
        }

        // A fresh builder over the same cache dir simulates a restart.
        let (builder, calls) = test_builder(&dir);
        let built = builder.build().await.expect("build");
        assert_eq!(built.provenance.source, IndexSource::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_signature_change_invalidates_cache() {
        let dir = TempDir::new().expect("tempdir");
        {
            let (builder, _) = test_builder(&dir);
            builder.build().await.expect("build");
        }

        let (backend, calls) = CountingBackend::new();
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            lattice_target: 16, // different target, different signature
            ..Config::default()
        };
        let extractor = Arc::new(EmbeddingExtractor::new(vec![backend]));
        let builder = ReferenceIndexBuilder::new(config, extractor);

        let built = builder.build().await.expect("build");
        assert_eq!(built.provenance.source, IndexSource::Built);
        assert_eq!(built.store.len(), 16);
        assert!(calls.load(Ordering::SeqCst) >= 16);
    }

    #[tokio::test]
    async fn test_build_fresh_ignores_envelope() {
        let dir = TempDir::new().expect("tempdir");
        let (builder, calls) = test_builder(&dir);
        builder.build().await.expect("build");
        let after_first = calls.load(Ordering::SeqCst);

        let rebuilt = builder.build_fresh().await.expect("rebuild");
        assert_eq!(rebuilt.provenance.source, IndexSource::Built);
        assert!(calls.load(Ordering::SeqCst) > after_first);
    }

    #[tokio::test]
    async fn test_missing_anchor_manifest_is_skipped_not_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let (backend, _) = CountingBackend::new();
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            lattice_target: 8,
            anchor_manifests: vec![dir.path().join("missing-manifest.json")],
            ..Config::default()
        };
        let extractor = Arc::new(EmbeddingExtractor::new(vec![backend]));
        let builder = ReferenceIndexBuilder::new(config, extractor);

        let built = builder.build().await.expect("build proceeds");
        assert_eq!(built.store.anchor_count(), 0);
        assert_eq!(built.store.lattice_count(), 8);
    }
}
