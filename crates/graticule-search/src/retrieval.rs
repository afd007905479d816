//! Top-k retrieval over the built reference index.
//!
//! The engine performs lazy build-or-load exactly once behind a
//! `OnceCell` — the first caller blocks while later callers await the same
//! initialization — and serves queries from an immutable snapshot shared
//! behind an `Arc`. A rebuild constructs a complete new snapshot and swaps
//! the shared reference; in-flight queries keep reading the old one.

use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};

use graticule_core::{ReferenceVector, VectorStore};
use graticule_etl::config::AnnSettings;
use graticule_etl::{BuiltIndex, IndexProvenance, IndexSource, ReferenceIndexBuilder};

use crate::ann::AnnIndex;
use crate::error::{SearchError, SearchResult};

/// One retrieval hit: a reference entry and its similarity to the query.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub reference: ReferenceVector,
    pub similarity: f64,
}

/// An immutable store + index pair served to queries.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub store: Arc<VectorStore>,
    pub provenance: IndexProvenance,
    pub signature: String,
    ann: AnnIndex,
}

impl IndexSnapshot {
    /// Top-k hits, totally ordered by descending similarity with
    /// ascending-id tie-break.
    #[must_use]
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<RetrievalHit> {
        let mut hits: Vec<RetrievalHit> = self
            .ann
            .query(vector, k)
            .into_iter()
            .filter_map(|(index, similarity)| {
                self.store.get(index).map(|reference| RetrievalHit {
                    reference: reference.clone(),
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.reference.id.cmp(&b.reference.id))
        });
        hits
    }
}

/// Lazily-initialized retrieval over the reference index.
#[derive(Debug)]
pub struct RetrievalEngine {
    builder: Option<Arc<ReferenceIndexBuilder>>,
    state: OnceCell<RwLock<Arc<IndexSnapshot>>>,
}

impl RetrievalEngine {
    /// An engine that builds (or loads) through the index builder on first
    /// use.
    #[must_use]
    pub fn new(builder: Arc<ReferenceIndexBuilder>) -> Self {
        Self {
            builder: Some(builder),
            state: OnceCell::new(),
        }
    }

    /// An engine over an explicit, already-built store. No persistence and
    /// no rebuild path; used by tests and embedding experiments.
    #[must_use]
    pub fn from_store(store: VectorStore, settings: AnnSettings) -> Self {
        let store = Arc::new(store);
        let ann = AnnIndex::build(&store, settings);
        let provenance = IndexProvenance {
            source: IndexSource::Built,
            embedding_source: "local".to_string(),
            lattice_count: store.lattice_count(),
            anchor_count: store.anchor_count(),
            synthesized: 0,
        };
        let snapshot = IndexSnapshot {
            store,
            provenance,
            signature: "local".to_string(),
            ann,
        };
        Self {
            builder: None,
            state: OnceCell::new_with(Some(RwLock::new(Arc::new(snapshot)))),
        }
    }

    async fn state(&self) -> SearchResult<&RwLock<Arc<IndexSnapshot>>> {
        self.state
            .get_or_try_init(|| async {
                let builder = self
                    .builder
                    .as_ref()
                    .ok_or_else(|| SearchError::Runtime("engine has no builder".to_string()))?;
                let built = builder.build().await?;
                let snapshot = Self::make_snapshot(builder, built)?;
                Ok(RwLock::new(Arc::new(snapshot)))
            })
            .await
    }

    fn make_snapshot(
        builder: &ReferenceIndexBuilder,
        built: BuiltIndex,
    ) -> SearchResult<IndexSnapshot> {
        let config = builder.config();
        let basename = config.ann_basename(&built.signature);
        let ann = AnnIndex::load_or_build(
            &built.store,
            &config.cache_dir,
            &basename,
            &built.signature,
            config.ann,
        );

        if ann.len() != built.store.len() {
            return Err(SearchError::IndexSizeMismatch {
                index_len: ann.len(),
                store_len: built.store.len(),
            });
        }

        Ok(IndexSnapshot {
            store: built.store,
            provenance: built.provenance,
            signature: built.signature,
            ann,
        })
    }

    /// The current snapshot, initializing on first call.
    pub async fn snapshot(&self) -> SearchResult<Arc<IndexSnapshot>> {
        let lock = self.state().await?;
        Ok(Arc::clone(&*lock.read().await))
    }

    /// Top-k query against the current snapshot.
    pub async fn query(&self, vector: &[f32], k: usize) -> SearchResult<Vec<RetrievalHit>> {
        Ok(self.snapshot().await?.query(vector, k))
    }

    /// Build a complete new snapshot and swap it in atomically. In-flight
    /// queries keep the snapshot they already hold.
    pub async fn rebuild(&self) -> SearchResult<()> {
        let builder = self
            .builder
            .as_ref()
            .ok_or_else(|| SearchError::Runtime("engine has no builder".to_string()))?;

        let built = builder.build_fresh().await?;
        let snapshot = Self::make_snapshot(builder, built)?;

        let lock = self.state().await?;
        *lock.write().await = Arc::new(snapshot);
        log::info!("retrieval snapshot swapped after rebuild");
        Ok(())
    }
}
