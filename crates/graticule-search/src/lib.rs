//! Vector search and calibration for graticule.
//!
//! Wraps the ANN graph capability (hnsw_rs) behind a size-validated
//! adapter, runs top-k retrieval over the built reference store, and
//! calibrates hit sets into confidence tiers, scene context, and the
//! report-or-withhold visibility decision. The `GeolocationService` façade
//! composes embedding → retrieval → calibration into one `predict` call.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod ann;
pub mod calibrate;
pub mod error;
pub mod retrieval;
pub mod service;

pub use ann::AnnIndex;
pub use calibrate::{CalibrationConfig, ConfidenceCalibrator};
pub use error::{SearchError, SearchResult};
pub use retrieval::{IndexSnapshot, RetrievalEngine, RetrievalHit};
pub use service::{GeolocationService, PredictMode};
