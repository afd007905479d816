//! Core domain model for graticule.
//!
//! This crate defines the reference-vector data model (lattice and anchor
//! entries, the immutable `VectorStore`), the versioned on-disk cache
//! envelope, prediction result types, and the vector/geographic math shared
//! by the build and retrieval sides.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod error;
pub mod geo;
pub mod model;
pub mod vector;

pub use error::{Error, Result};
pub use model::reference::{ReferenceKind, ReferenceVector, VectorStore, EMBEDDING_DIM};
