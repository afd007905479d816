//! The Anchors stage: fan-out to every configured anchor manifest.
//!
//! Each manifest runs as an independent subtask, so one failing source can
//! be retried alone while the others' envelopes stand.

use std::path::Path;
use std::sync::Arc;

use treadle::{Stage, StageContext, StageOutcome, SubTask};

use graticule_core::cache::CacheEnvelope;

use crate::anchors::source::{collect_manifest_anchors, AnchorFetcher, AnchorManifest};
use crate::config::Config;
use crate::embed::{EmbeddingExtractor, FallbackPolicy};
use crate::error::{BuildError, BuildResult};

/// The Anchors stage: embed curated landmark image sets.
#[derive(Debug)]
pub struct AnchorStage {
    config: Config,
    extractor: Arc<EmbeddingExtractor>,
}

impl AnchorStage {
    #[must_use]
    pub fn new(config: Config, extractor: Arc<EmbeddingExtractor>) -> Self {
        Self { config, extractor }
    }

    fn manifest_name(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest".to_string())
    }

    async fn run_source(&self, name: &str) -> BuildResult<usize> {
        let path = self
            .config
            .anchor_manifests
            .iter()
            .find(|p| Self::manifest_name(p) == name)
            .cloned()
            .ok_or_else(|| BuildError::source_fetch(name, "manifest not configured"))?;

        let tier = self.extractor.resolve_tier(FallbackPolicy::Accurate)?;
        let signature = self.config.build_signature(tier.tag()).render();
        let envelope_path = self.config.anchor_envelope_path(&signature, name);

        if envelope_path.exists() {
            log::info!("anchor envelope up to date: {}", envelope_path.display());
            return Ok(0);
        }

        let manifest = AnchorManifest::load(&path)?;
        let fetcher = AnchorFetcher::new(
            self.config.anchor_fetch_timeout_secs,
            self.config.anchor_fetch_retries,
        )
        .map_err(|e| BuildError::source_fetch(name, e.to_string()))?;

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
                "manifest {name}: {empty_sites} sites yielded no anchors"
            );
        }

        let count = vectors.len();
        CacheEnvelope::new(signature, tier.tag(), vectors).save(&envelope_path)?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl Stage for AnchorStage {
    fn name(&self) -> &str {
        "anchors"
    }

    async fn execute(
        &self,
        item: &dyn treadle::WorkItem,
        ctx: &mut StageContext,
    ) -> treadle::Result<StageOutcome> {
        match ctx.subtask_name.as_deref() {
            // First call: fan out to all configured manifests.
            None => {
                if self.config.anchor_manifests.is_empty() {
                    // A lattice-only build is valid.
                    log::info!("no anchor manifests configured; skipping anchors");
                    return Ok(StageOutcome::Complete);
                }

                let subtasks: Vec<SubTask> = self
                    .config
                    .anchor_manifests
                    .iter()
                    .map(|p| SubTask::new(Self::manifest_name(p)))
                    .collect();

                log::info!(
                    "embedding anchors for {} with {} manifests",
                    item.id(),
                    subtasks.len()
                );

                Ok(StageOutcome::FanOut(subtasks))
            }

            Some(name) => match self.run_source(name).await {
                Ok(count) => {
                    log::info!("anchor source {name} complete: {count} anchors");
                    Ok(StageOutcome::Complete)
                }
                Err(e) => Err(treadle::TreadleError::StageExecution(format!(
                    "Anchor source {name} failed: {e}"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::DeterministicBackend;
    use std::path::PathBuf;

    fn test_stage(manifests: Vec<PathBuf>) -> AnchorStage {
        let config = Config {
            anchor_manifests: manifests,
            ..Config::default()
        };
        let extractor =
            EmbeddingExtractor::new(vec![Arc::new(DeterministicBackend::new())]);
        AnchorStage::new(config, Arc::new(extractor))
    }

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
    async fn test_anchor_stage_completes_without_manifests() {
        let stage = test_stage(Vec::new());
        let item = TestItem {
            id: "build".to_string(),
        };
        let mut ctx = StageContext::new("anchors".to_string());

        let outcome = stage.execute(&item, &mut ctx).await.expect("execute");
        assert!(matches!(outcome, StageOutcome::Complete));
    }

    #[tokio::test]
    async fn test_anchor_stage_fans_out_per_manifest() {
        let stage = test_stage(vec![
            PathBuf::from("/data/wikimedia.json"),
            PathBuf::from("/data/mapillary.json"),
        ]);
        let item = TestItem {
            id: "build".to_string(),
        };
        let mut ctx = StageContext::new("anchors".to_string());

        let outcome = stage.execute(&item, &mut ctx).await.expect("execute");
        match outcome {
            StageOutcome::FanOut(subtasks) => {
                let ids: Vec<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
                assert_eq!(ids, vec!["wikimedia", "mapillary"]);
            }
            other => panic!("expected FanOut, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_anchor_stage_unknown_subtask_fails() {
        let stage = test_stage(Vec::new());
        let item = TestItem {
            id: "build".to_string(),
        };
        let mut ctx = StageContext::new("anchors".to_string()).with_subtask("mystery");

        let result = stage.execute(&item, &mut ctx).await;
        assert!(result.is_err());
    }
}
