use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::{is_unit_norm, l2_norm};

/// Output dimensionality shared by every embedding backend in the system.
///
/// A vector of any other length is a hard error, never coerced.
pub const EMBEDDING_DIM: usize = 512;

/// Which subset of the reference index an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Embedded directly from a (lat, lon) pair on the global sampling grid.
    Lattice,
    /// Embedded from a real photograph tied to a known landmark coordinate.
    Anchor,
}

/// A single reference embedding with its ground-truth coordinate.
///
/// Immutable once a build completes; destroyed only by a full index rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceVector {
    /// Unique id within one `VectorStore`.
    pub id: String,

    /// Human-readable label. Informational only; may repeat.
    pub label: String,

    pub lat: f64,
    pub lon: f64,

    pub kind: ReferenceKind,

    /// Unit-normalized embedding of exactly [`EMBEDDING_DIM`] components.
    pub vector: Vec<f32>,
}

impl ReferenceVector {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        lat: f64,
        lon: f64,
        kind: ReferenceKind,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            lat,
            lon,
            kind,
            vector,
        }
    }

    /// Check the dimension, coordinate-range, and unit-norm invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid_record("<unnamed>", "empty id"));
        }
        if self.vector.len() != EMBEDDING_DIM {
            return Err(Error::invalid_record(
                &self.id,
                format!(
                    "dimension {} != expected {EMBEDDING_DIM}",
                    self.vector.len()
                ),
            ));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::invalid_record(
                &self.id,
                format!("latitude {} out of range", self.lat),
            ));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(Error::invalid_record(
                &self.id,
                format!("longitude {} out of range", self.lon),
            ));
        }
        if !is_unit_norm(&self.vector) {
            return Err(Error::invalid_record(
                &self.id,
                format!("vector norm {} not unit", l2_norm(&self.vector)),
            ));
        }
        Ok(())
    }
}

/// The immutable, in-memory reference index: a coordinate lattice plus zero
/// or more image anchors, with unique ids.
///
/// "Updating" a store means building a new one and swapping the shared
/// reference; entries are never mutated while readers exist.
#[derive(Debug, Clone)]
pub struct VectorStore {
    vectors: Vec<ReferenceVector>,
    lattice_count: usize,
    anchor_count: usize,
}

impl VectorStore {
    /// Build a store from validated entries.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateId`] on id collision and
    /// [`Error::InvalidRecord`] when any entry violates the dimension,
    /// coordinate, or norm invariants.
    pub fn from_vectors(vectors: Vec<ReferenceVector>) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(vectors.len());
        let mut lattice_count = 0;
        let mut anchor_count = 0;

        for v in &vectors {
            v.validate()?;
            if !seen.insert(v.id.as_str().to_owned()) {
                return Err(Error::DuplicateId(v.id.clone()));
            }
            match v.kind {
                ReferenceKind::Lattice => lattice_count += 1,
                ReferenceKind::Anchor => anchor_count += 1,
            }
        }

        Ok(Self {
            vectors,
            lattice_count,
            anchor_count,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn lattice_count(&self) -> usize {
        self.lattice_count
    }

    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.anchor_count
    }

    /// Entry at a positional index, as assigned at build time.
    ///
    /// Positions are stable for the lifetime of the store and are the ids
    /// handed to the ANN graph.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ReferenceVector> {
        self.vectors.get(index)
    }

    #[must_use]
    pub fn vectors(&self) -> &[ReferenceVector] {
        &self.vectors
    }

    /// Consume the store, yielding its entries in positional order.
    #[must_use]
    pub fn into_vectors(self) -> Vec<ReferenceVector> {
        self.vectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::l2_normalize;

    fn unit_vector(seed: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..EMBEDDING_DIM)
            .map(|i| ((i + seed) % 7) as f32 + 1.0)
            .collect();
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_reference_vector_validate_ok() {
        let v = ReferenceVector::new(
            "lat-1",
            "grid",
            45.0,
            90.0,
            ReferenceKind::Lattice,
            unit_vector(0),
        );
        assert!(v.validate().is_ok());
    }

    #[test]
    fn test_reference_vector_rejects_wrong_dimension() {
        let v = ReferenceVector::new("x", "x", 0.0, 0.0, ReferenceKind::Lattice, vec![1.0; 16]);
        assert!(matches!(v.validate(), Err(Error::InvalidRecord { .. })));
    }

    #[test]
    fn test_reference_vector_rejects_out_of_range_coordinates() {
        let v = ReferenceVector::new(
            "x",
            "x",
            91.0,
            0.0,
            ReferenceKind::Lattice,
            unit_vector(0),
        );
        assert!(v.validate().is_err());

        let v = ReferenceVector::new(
            "x",
            "x",
            0.0,
            -200.0,
            ReferenceKind::Lattice,
            unit_vector(0),
        );
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_reference_vector_rejects_non_unit_norm() {
        let v = ReferenceVector::new(
            "x",
            "x",
            0.0,
            0.0,
            ReferenceKind::Lattice,
            vec![2.0; EMBEDDING_DIM],
        );
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_vector_store_counts_subsets() {
        let store = VectorStore::from_vectors(vec![
            ReferenceVector::new("a", "", 0.0, 0.0, ReferenceKind::Lattice, unit_vector(1)),
            ReferenceVector::new("b", "", 1.0, 1.0, ReferenceKind::Anchor, unit_vector(2)),
            ReferenceVector::new("c", "", 2.0, 2.0, ReferenceKind::Anchor, unit_vector(3)),
        ])
        .expect("valid store");

        assert_eq!(store.len(), 3);
        assert_eq!(store.lattice_count(), 1);
        assert_eq!(store.anchor_count(), 2);
    }

    #[test]
    fn test_vector_store_rejects_duplicate_ids() {
        let result = VectorStore::from_vectors(vec![
            ReferenceVector::new("a", "", 0.0, 0.0, ReferenceKind::Lattice, unit_vector(1)),
            ReferenceVector::new("a", "", 1.0, 1.0, ReferenceKind::Anchor, unit_vector(2)),
        ]);
        assert!(matches!(result, Err(Error::DuplicateId(id)) if id == "a"));
    }
}
