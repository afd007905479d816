//! Versioned on-disk persistence for built reference stores.
//!
//! A [`CacheEnvelope`] is the only durable representation of a
//! [`VectorStore`]: gzip-compressed JSON, keyed by a content-derived build
//! signature. A signature mismatch always forces a full rebuild — envelopes
//! are never partially merged across versions.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::reference::{ReferenceVector, VectorStore, EMBEDDING_DIM};

/// Bumped whenever the envelope schema changes shape.
pub const SCHEMA_REVISION: u32 = 2;

/// The content-derived signature gating every cache file and index blob.
///
/// Encodes the embedding backend identity, the dimension, the lattice
/// target, and the anchor-manifest revision, so changing any of them
/// invalidates stale caches automatically. Defined once here; no cache file
/// carries its own ad hoc version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSignature {
    /// Diagnostic tag of the backend the store was embedded with.
    pub backend: String,
    /// Target number of lattice points.
    pub lattice_target: usize,
    /// Revision of the configured anchor manifests (empty when none).
    pub anchor_revision: String,
}

impl BuildSignature {
    #[must_use]
    pub fn new(
        backend: impl Into<String>,
        lattice_target: usize,
        anchor_revision: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            lattice_target,
            anchor_revision: anchor_revision.into(),
        }
    }

    /// Render the signature string used as the cache key.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "v{SCHEMA_REVISION}:{}:d{EMBEDDING_DIM}:l{}:a{}",
            self.backend, self.lattice_target, self.anchor_revision
        )
    }
}

impl fmt::Display for BuildSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// The on-disk representation of a built [`VectorStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// Build signature the envelope was produced under.
    pub version: String,

    /// Diagnostic tag of the embedding backend (`geoclip`, `clip`,
    /// `fallback`). One envelope always holds a single tier.
    pub embedding_source: String,

    pub built_at: DateTime<Utc>,

    pub vectors: Vec<ReferenceVector>,
}

impl CacheEnvelope {
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        embedding_source: impl Into<String>,
        vectors: Vec<ReferenceVector>,
    ) -> Self {
        Self {
            version: version.into(),
            embedding_source: embedding_source.into(),
            built_at: Utc::now(),
            vectors,
        }
    }

    /// Persist as gzip-compressed JSON.
    ///
    /// The write goes through a sibling temp file and an atomic rename so a
    /// crashed build never publishes a partial envelope.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, compressed)?;
        std::fs::rename(&tmp, path)?;

        log::debug!(
            "envelope saved: {} ({} vectors, version {})",
            path.display(),
            self.vectors.len(),
            self.version
        );
        Ok(())
    }

    /// Load an envelope, enforcing the version gate and per-record
    /// invariants.
    ///
    /// Records failing validation are excluded (logged), mirroring the
    /// catalog-load policy; a version mismatch is a hard
    /// [`Error::CacheVersionMismatch`] so callers rebuild from scratch.
    pub fn load(path: &Path, expected_version: &str) -> Result<Self> {
        let compressed = std::fs::read(path)?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;

        let mut envelope: Self = serde_json::from_slice(&json)?;
        if envelope.version != expected_version {
            return Err(Error::CacheVersionMismatch {
                expected: expected_version.to_string(),
                found: envelope.version,
            });
        }

        let before = envelope.vectors.len();
        envelope.vectors.retain(|v| match v.validate() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cached vector excluded: {e}");
                false
            }
        });
        if envelope.vectors.len() < before {
            log::warn!(
                "envelope {}: {} of {before} cached vectors excluded",
                path.display(),
                before - envelope.vectors.len()
            );
        }

        Ok(envelope)
    }

    /// Convert into an immutable [`VectorStore`].
    pub fn into_store(self) -> Result<VectorStore> {
        VectorStore::from_vectors(self.vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::reference::ReferenceKind;
    use crate::vector::l2_normalize;
    use tempfile::TempDir;

    fn unit_vector(seed: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..EMBEDDING_DIM)
            .map(|i| ((i * 31 + seed * 7) % 13) as f32 - 6.0)
            .collect();
        l2_normalize(&mut v);
        v
    }

    fn sample_vectors() -> Vec<ReferenceVector> {
        vec![
            ReferenceVector::new(
                "lat-0",
                "grid",
                12.5,
                -33.25,
                ReferenceKind::Lattice,
                unit_vector(1),
            ),
            ReferenceVector::new(
                "anchor-eiffel",
                "Eiffel Tower",
                48.8584,
                2.2945,
                ReferenceKind::Anchor,
                unit_vector(2),
            ),
        ]
    }

    #[test]
    fn test_signature_encodes_backend_and_counts() {
        let sig = BuildSignature::new("geoclip", 12_000, "r1");
        let rendered = sig.render();
        assert!(rendered.contains("geoclip"));
        assert!(rendered.contains("l12000"));
        assert!(rendered.contains(&format!("d{EMBEDDING_DIM}")));

        let other = BuildSignature::new("fallback", 12_000, "r1");
        assert_ne!(rendered, other.render());
    }

    #[test]
    fn test_envelope_round_trip_preserves_content() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("reference.json.gz");

        let envelope = CacheEnvelope::new("v2:test", "fallback", sample_vectors());
        envelope.save(&path).expect("save");

        let loaded = CacheEnvelope::load(&path, "v2:test").expect("load");
        assert_eq!(loaded.vectors, envelope.vectors);
        assert_eq!(loaded.embedding_source, "fallback");
    }

    #[test]
    fn test_envelope_version_gate() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("reference.json.gz");

        CacheEnvelope::new("v2:old", "fallback", sample_vectors())
            .save(&path)
            .expect("save");

        let result = CacheEnvelope::load(&path, "v2:new");
        assert!(matches!(result, Err(Error::CacheVersionMismatch { .. })));
    }

    #[test]
    fn test_envelope_load_excludes_invalid_records() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("reference.json.gz");

        let mut vectors = sample_vectors();
        vectors.push(ReferenceVector::new(
            "broken",
            "",
            91.0,
            0.0,
            ReferenceKind::Lattice,
            unit_vector(3),
        ));
        CacheEnvelope::new("v2:test", "fallback", vectors)
            .save(&path)
            .expect("save");

        let loaded = CacheEnvelope::load(&path, "v2:test").expect("load");
        assert_eq!(loaded.vectors.len(), 2);
        assert!(loaded.vectors.iter().all(|v| v.id != "broken"));
    }

    #[test]
    fn test_envelope_into_store() {
        let envelope = CacheEnvelope::new("v2:test", "fallback", sample_vectors());
        let store = envelope.into_store().expect("store");
        assert_eq!(store.len(), 2);
        assert_eq!(store.anchor_count(), 1);
    }

    #[test]
    fn test_save_does_not_leave_temp_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("reference.json.gz");
        CacheEnvelope::new("v2:test", "fallback", sample_vectors())
            .save(&path)
            .expect("save");
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
