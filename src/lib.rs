//! # Graticule
//!
//! A local photo-geolocation engine.
//!
//! Graticule embeds a photograph into a shared visual-geographic vector
//! space and retrieves nearest neighbors from a precomputed reference index
//! that mixes a worldwide coordinate lattice with image anchors tied to
//! known landmarks. Retrieval results are calibrated into a coordinate
//! estimate, an uncertainty radius, and a confidence tier that decides
//! whether a location is reported or withheld. All inference is local; no
//! network round-trip is required to answer a query.
