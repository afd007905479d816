//! The Assemble stage: merge the lattice and anchor envelopes into the
//! final reference envelope.

use std::sync::Arc;

use treadle::{Stage, StageContext, StageOutcome};

use graticule_core::cache::CacheEnvelope;
use graticule_core::{ReferenceVector, VectorStore};

use crate::config::Config;
use crate::embed::{EmbeddingExtractor, FallbackPolicy};
use crate::error::{BuildError, BuildResult};

/// The Assemble stage: concatenate intermediate envelopes, validate the
/// merged store, and publish the reference envelope.
#[derive(Debug)]
pub struct AssembleStage {
    config: Config,
    extractor: Arc<EmbeddingExtractor>,
}

impl AssembleStage {
    #[must_use]
    pub fn new(config: Config, extractor: Arc<EmbeddingExtractor>) -> Self {
        Self { config, extractor }
    }

    async fn run(&self) -> BuildResult<(usize, usize)> {
        let tier = self.extractor.resolve_tier(FallbackPolicy::Accurate)?;
        let signature = self.config.build_signature(tier.tag()).render();

        let lattice_path = self.config.lattice_envelope_path(&signature);
        let lattice = CacheEnvelope::load(&lattice_path, &signature)?;

        let mut vectors: Vec<ReferenceVector> = lattice.vectors;

        for manifest_path in &self.config.anchor_manifests {
            let name = manifest_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "manifest".to_string());
            let path = self.config.anchor_envelope_path(&signature, &name);
            if !path.exists() {
                // The source failed upstream; the build proceeds without it.
                log::warn!("anchor envelope missing for {name}; continuing without it");
                continue;
            }
            match CacheEnvelope::load(&path, &signature) {
                Ok(envelope) => vectors.extend(envelope.vectors),
                Err(e) => log::warn!("anchor envelope {name} unusable ({e}); skipped"),
            }
        }

        if vectors.is_empty() {
            return Err(BuildError::NoReferenceVectors);
        }

        let store = VectorStore::from_vectors(vectors)?;
        let (lattice_count, anchor_count) = (store.lattice_count(), store.anchor_count());

        let reference_path = self.config.reference_envelope_path(&signature);
        CacheEnvelope::new(&signature, tier.tag(), store.into_vectors())
            .save(&reference_path)?;

        Ok((lattice_count, anchor_count))
    }
}

#[async_trait::async_trait]
impl Stage for AssembleStage {
    fn name(&self) -> &str {
        "assemble"
    }

    async fn execute(
        &self,
        _item: &dyn treadle::WorkItem,
        _context: &mut StageContext,
    ) -> treadle::Result<StageOutcome> {
        match self.run().await {
            Ok((lattice_count, anchor_count)) => {
                if anchor_count == 0 {
                    log::info!(
                        "Assemble complete: {lattice_count} lattice points, lattice-only store"
                    );
                } else {
                    log::info!(
                        "Assemble complete: {lattice_count} lattice points, {anchor_count} anchors"
                    );
                }
                Ok(StageOutcome::Complete)
            }
            Err(e) => Err(treadle::TreadleError::StageExecution(format!(
                "Assemble failed: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{DeterministicBackend, EmbeddingTier};
    use crate::lattice::{embed_lattice, generate_lattice};
    use tempfile::TempDir;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct TestItem {
        id: String,
    }

    impl treadle::WorkItem for TestItem {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn test_assemble_merges_lattice_envelope() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            lattice_target: 8,
            ..Config::default()
        };
        let extractor = Arc::new(EmbeddingExtractor::new(vec![Arc::new(
            DeterministicBackend::new(),
        )]));

        // Seed the intermediate lattice envelope.
        let tier = EmbeddingTier::Deterministic;
        let signature = config.build_signature(tier.tag()).render();
        let entries = generate_lattice(8, &[]);
        let (vectors, _) = embed_lattice(&extractor, tier, &entries).expect("embed");
        CacheEnvelope::new(&signature, tier.tag(), vectors)
            .save(&config.lattice_envelope_path(&signature))
            .expect("save");

        let stage = AssembleStage::new(config.clone(), extractor);
        let item = TestItem {
            id: "build".to_string(),
        };
        let mut ctx = StageContext::new("assemble".to_string());
        let outcome = stage.execute(&item, &mut ctx).await.expect("assemble");
        assert!(matches!(outcome, StageOutcome::Complete));

        let reference = CacheEnvelope::load(
            &config.reference_envelope_path(&signature),
            &signature,
        )
        .expect("reference envelope");
        assert_eq!(reference.vectors.len(), 8);
    }

    #[tokio::test]
    async fn test_assemble_fails_without_lattice_envelope() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            lattice_target: 8,
            ..Config::default()
        };
        let extractor = Arc::new(EmbeddingExtractor::new(vec![Arc::new(
            DeterministicBackend::new(),
        )]));

        let stage = AssembleStage::new(config, extractor);
        let item = TestItem {
            id: "build".to_string(),
        };
        let mut ctx = StageContext::new("assemble".to_string());
        assert!(stage.execute(&item, &mut ctx).await.is_err());
    }
}
