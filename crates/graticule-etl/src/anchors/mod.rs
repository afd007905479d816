//! Anchor curation: turning pools of candidate landmark photos into a
//! bounded, diverse set of reference anchors.

pub mod curator;
pub mod source;
pub mod stage;

pub use curator::{select_diverse, CandidateScore, NEAR_DUPLICATE_THRESHOLD};
pub use source::{AnchorFetcher, AnchorManifest, AnchorSite};
pub use stage::AnchorStage;
