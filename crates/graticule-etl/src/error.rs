//! Error types for embedding and index building.

use thiserror::Error;

/// Errors from embedding backends and the extractor pipeline.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Required model assets are missing or the backend is compiled out.
    ///
    /// Never swallowed inside the extractor: the fallback policy decides
    /// whether a lower tier is attempted.
    #[error("model unavailable for backend {backend}: {reason}")]
    ModelUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// The input bytes could not be decoded into an image.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// A backend produced a vector of the wrong dimensionality. Hard error,
    /// never coerced.
    #[error("embedding dimension {actual} != expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A backend failed while computing an embedding.
    #[error("backend {backend} failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    /// Every tier permitted by the fallback policy failed.
    #[error("all embedding tiers exhausted")]
    Exhausted,
}

impl EmbedError {
    /// Whether a lower tier may be attempted for this failure.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable { .. } | Self::Backend { .. }
        )
    }
}

/// Errors from the reference-index build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Core(#[from] graticule_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An anchor image or manifest could not be fetched or parsed. The
    /// build skips the source and continues; this variant only reaches
    /// callers of the fetch helpers themselves.
    #[error("anchor source {source_ref} failed: {message}")]
    SourceFetch { source_ref: String, message: String },

    /// The build produced no reference vectors at all — no lattice and no
    /// fallback. The only build failure that propagates to the service
    /// boundary.
    #[error("build produced no reference vectors")]
    NoReferenceVectors,
}

impl BuildError {
    pub fn source_fetch(source_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceFetch {
            source_ref: source_ref.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias for build results.
pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_unavailable_is_recoverable() {
        let e = EmbedError::ModelUnavailable {
            backend: "geoclip",
            reason: "weights missing".to_string(),
        };
        assert!(e.is_recoverable());
    }

    #[test]
    fn test_dimension_mismatch_is_not_recoverable() {
        let e = EmbedError::DimensionMismatch {
            expected: 512,
            actual: 768,
        };
        assert!(!e.is_recoverable());
    }
}
