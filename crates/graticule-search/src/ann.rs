//! Adapter over the hnsw_rs ANN graph.
//!
//! The graph is a derived, rebuildable structure: the cache envelope is the
//! source of truth. The dumped blob carries a sidecar metadata file whose
//! version and element count must agree with the store; any disagreement or
//! read failure discards the blob and rebuilds from the store, so a corrupt
//! blob can cost startup latency but never correctness.

use std::fmt;
use std::path::Path;

use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};

use graticule_core::VectorStore;

use graticule_etl::config::AnnSettings;

use crate::error::{SearchError, SearchResult};

/// Fixed layer budget for the graph.
const NB_LAYERS: usize = 16;

/// Sidecar metadata persisted next to the graph blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnnSidecar {
    version: String,
    count: usize,
    m: usize,
    ef_construction: usize,
}

/// An immutable ANN index over one `VectorStore` snapshot.
///
/// Element ids are the store's positional indices.
pub struct AnnIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    settings: AnnSettings,
    count: usize,
}

impl fmt::Debug for AnnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnIndex")
            .field("count", &self.count)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AnnIndex {
    /// Build a graph from a store, inserting entries in positional order.
    #[must_use]
    pub fn build(store: &VectorStore, settings: AnnSettings) -> Self {
        let capacity = store.len().max(16);
        let hnsw = Hnsw::<f32, DistCosine>::new(
            settings.m,
            capacity,
            NB_LAYERS,
            settings.ef_construction,
            DistCosine {},
        );
        for (index, reference) in store.vectors().iter().enumerate() {
            hnsw.insert((&reference.vector, index));
        }
        Self {
            hnsw,
            settings,
            count: store.len(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// k-nearest search, returning `(store_index, similarity)` pairs.
    ///
    /// Cosine distance is converted to similarity as `1 − d`, keeping the
    /// score consistent with the calibration stage.
    #[must_use]
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<(usize, f64)> {
        if self.count == 0 || k == 0 {
            return Vec::new();
        }
        let ef = self.settings.ef_search.max(2 * k);
        let neighbours = self.hnsw.search(vector, k.min(self.count), ef);
        neighbours
            .into_iter()
            .map(|n| (n.d_id, f64::from(1.0 - n.distance)))
            .collect()
    }

    /// Dump the graph blob plus its sidecar metadata.
    pub fn save(&self, dir: &Path, basename: &str, version: &str) -> SearchResult<()> {
        std::fs::create_dir_all(dir)?;
        self.hnsw
            .file_dump(dir, basename)
            .map_err(|e| SearchError::Ann(e.to_string()))?;

        let sidecar = AnnSidecar {
            version: version.to_string(),
            count: self.count,
            m: self.settings.m,
            ef_construction: self.settings.ef_construction,
        };
        let sidecar_path = dir.join(format!("{basename}.meta.json"));
        let tmp = sidecar_path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&sidecar).map_err(graticule_core::Error::from)?)?;
        std::fs::rename(&tmp, &sidecar_path)?;
        Ok(())
    }

    /// Reload a dumped graph, validating the sidecar against the store.
    pub fn load(
        dir: &Path,
        basename: &str,
        version: &str,
        store: &VectorStore,
        settings: AnnSettings,
    ) -> SearchResult<Self> {
        let sidecar_path = dir.join(format!("{basename}.meta.json"));
        let sidecar: AnnSidecar =
            serde_json::from_slice(&std::fs::read(&sidecar_path)?)
                .map_err(graticule_core::Error::from)?;

        if sidecar.version != version {
            return Err(SearchError::Ann(format!(
                "stale index version {} (expected {version})",
                sidecar.version
            )));
        }
        if sidecar.count != store.len() {
            return Err(SearchError::IndexSizeMismatch {
                index_len: sidecar.count,
                store_len: store.len(),
            });
        }

        // The reloader owns buffers the graph borrows from; leak it so the
        // graph is 'static. One load per snapshot, so the leak is bounded.
        let reloader: &'static mut HnswIo = Box::leak(Box::new(HnswIo::new(dir, basename)));
        let hnsw = reloader
            .load_hnsw::<f32, DistCosine>()
            .map_err(|e| SearchError::Ann(e.to_string()))?;

        Ok(Self {
            hnsw,
            settings,
            count: sidecar.count,
        })
    }

    /// Load a valid dumped graph or rebuild (and persist) from the store.
    #[must_use]
    pub fn load_or_build(
        store: &VectorStore,
        dir: &Path,
        basename: &str,
        version: &str,
        settings: AnnSettings,
    ) -> Self {
        match Self::load(dir, basename, version, store, settings) {
            Ok(index) => {
                log::info!("ANN index loaded ({} elements)", index.len());
                index
            }
            Err(e) => {
                log::info!("ANN index rebuild ({e})");
                let index = Self::build(store, settings);
                if let Err(e) = index.save(dir, basename, version) {
                    log::warn!("ANN index persist failed: {e}");
                }
                index
            }
        }
    }
}
