use thiserror::Error;

use graticule_etl::{BuildError, EmbedError};

#[derive(Debug, Error)]
pub enum SearchError {
    /// The on-disk ANN index disagrees with the store it claims to cover.
    /// Recovered by rebuilding the index, never by partial trust.
    #[error("index size mismatch: index has {index_len} elements, store has {store_len}")]
    IndexSizeMismatch { index_len: usize, store_len: usize },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Core(#[from] graticule_core::Error),

    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("ANN index error: {0}")]
    Ann(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;
