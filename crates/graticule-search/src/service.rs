//! The top-level prediction façade.
//!
//! Composes embedding extraction → retrieval → calibration into a single
//! `predict(image_bytes, mode)` call. An explicit service object: every
//! instance owns its extractor, engine, and calibrator, so tests build
//! isolated services instead of sharing hidden global state.

use std::sync::Arc;

use graticule_core::model::prediction::{Diagnostics, PredictionResult, SceneContext};
use graticule_etl::{Config, EmbeddingExtractor, FallbackPolicy, ReferenceIndexBuilder};

use crate::calibrate::{CalibrationConfig, ConfidenceCalibrator};
use crate::error::{SearchError, SearchResult};
use crate::retrieval::RetrievalEngine;

/// Request mode: how much work a prediction may spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictMode {
    /// Smaller k; skips the secondary backend attempt on primary failure.
    Fast,
    /// Full fallback chain and a wider k.
    Accurate,
}

impl PredictMode {
    /// Top-k width for this mode.
    #[must_use]
    pub const fn k(self) -> usize {
        match self {
            Self::Fast => 8,
            Self::Accurate => 16,
        }
    }

    /// Embedding fallback policy for this mode.
    #[must_use]
    pub const fn policy(self) -> FallbackPolicy {
        match self {
            Self::Fast => FallbackPolicy::Fast,
            Self::Accurate => FallbackPolicy::Accurate,
        }
    }
}

/// Embedding → retrieval → calibration behind one `predict` call.
#[derive(Debug)]
pub struct GeolocationService {
    extractor: Arc<EmbeddingExtractor>,
    engine: Arc<RetrievalEngine>,
    calibrator: ConfidenceCalibrator,
}

impl GeolocationService {
    /// Standard wiring from configuration: default backends, cached index
    /// builder, calibration overrides when configured.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let extractor = Arc::new(EmbeddingExtractor::with_default_backends(&config.model_dir));

        let calibrator = match &config.calibration_path {
            Some(path) => match CalibrationConfig::load(path) {
                Ok(thresholds) => ConfidenceCalibrator::new(thresholds),
                Err(e) => {
                    log::warn!("calibration overrides unusable ({e}); using defaults");
                    ConfidenceCalibrator::default()
                }
            },
            None => ConfidenceCalibrator::default(),
        };

        let builder = Arc::new(ReferenceIndexBuilder::new(config, Arc::clone(&extractor)));
        let engine = Arc::new(RetrievalEngine::new(builder));

        Self {
            extractor,
            engine,
            calibrator,
        }
    }

    /// Explicit wiring, for tests and embedders.
    #[must_use]
    pub fn new(
        extractor: Arc<EmbeddingExtractor>,
        engine: Arc<RetrievalEngine>,
        calibrator: ConfidenceCalibrator,
    ) -> Self {
        Self {
            extractor,
            engine,
            calibrator,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<RetrievalEngine> {
        &self.engine
    }

    /// Predict a location for a photograph.
    ///
    /// Decoding and embedding run on the blocking pool; dropping the
    /// returned future cancels the request, while work already submitted
    /// finishes and is discarded. Always returns a structured result for
    /// decodable input — an ambiguous photo is a `Withheld` result, not an
    /// error.
    pub async fn predict(
        &self,
        image_bytes: Vec<u8>,
        mode: PredictMode,
    ) -> SearchResult<PredictionResult> {
        let extractor = Arc::clone(&self.extractor);
        let policy = mode.policy();
        let embedding =
            tokio::task::spawn_blocking(move || extractor.embed_image_bytes(&image_bytes, policy))
                .await
                .map_err(|e| SearchError::Runtime(e.to_string()))??;

        let snapshot = self.engine.snapshot().await?;
        let hits = snapshot.query(&embedding.vector, mode.k());
        log::debug!(
            "retrieved {} hits at tier {} (best {:.3})",
            hits.len(),
            embedding.tier.tag(),
            hits.first().map_or(0.0, |h| h.similarity)
        );

        let calibration = self.calibrator.calibrate(&hits, embedding.tier);

        Ok(PredictionResult {
            location: calibration.location,
            visibility: calibration.visibility,
            confidence: calibration.confidence,
            tier: calibration.tier,
            scene_context: SceneContext {
                scene_type: calibration.scene_type,
                cohort_hint: calibration.cohort_hint,
                confidence_calibration: calibration.explanation,
            },
            diagnostics: Diagnostics {
                request_id: uuid::Uuid::new_v4().to_string(),
                embedding_source: embedding.tier.tag().to_string(),
                reference_index_source: snapshot.provenance.reference_index_source(),
                reference_image_anchors: snapshot.store.anchor_count(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tuning() {
        assert_eq!(PredictMode::Fast.k(), 8);
        assert_eq!(PredictMode::Accurate.k(), 16);
        assert_eq!(PredictMode::Fast.policy(), FallbackPolicy::Fast);
        assert_eq!(PredictMode::Accurate.policy(), FallbackPolicy::Accurate);
    }
}
