//! Embedding extraction and reference-index build pipeline for graticule.
//!
//! Implements the embedding backends with their degrading fallback chain,
//! coordinate-lattice generation, anchor-source loading and curation, the
//! cached `ReferenceIndexBuilder`, and the lattice → anchors → assemble
//! build stages as treadle `Stage` implementations.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod anchors;
pub mod assemble;
pub mod builder;
pub mod config;
pub mod embed;
pub mod error;
pub mod lattice;
pub mod pipeline;
pub mod work_item;

pub use builder::{BuiltIndex, IndexProvenance, IndexSource, ReferenceIndexBuilder};
pub use config::Config;
pub use embed::{
    DeterministicBackend, Embedding, EmbeddingBackend, EmbeddingExtractor, EmbeddingTier,
    FallbackPolicy, PreparedImage,
};
pub use error::{BuildError, BuildResult, EmbedError};
pub use pipeline::build_pipeline;
pub use work_item::BuildJob;
