use serde::{Deserialize, Serialize};

/// Calibrated confidence tier for a prediction.
///
/// Ordered so that `Low < Medium < High`; the calibrator uses `min` to cap
/// tiers when the embedding came from a degraded backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

/// Whether a coordinate is reported to the caller or withheld.
///
/// A withheld result is a normal terminal state, not an error: it
/// distinguishes "no usable answer" from "low-precision answer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Withheld,
}

/// Coarse scene classification derived from the winning reference subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    Landmark,
    Nature,
    Urban,
    Rural,
    Unknown,
}

/// Whether the winning hits came from the iconic-landmark anchor subset or
/// the generic coordinate lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortHint {
    IconicLandmark,
    GenericScene,
}

/// The reported coordinate estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationEstimate {
    pub lat: f64,
    pub lon: f64,
    /// Uncertainty radius in meters, floored so a tight top-k never implies
    /// false precision.
    pub radius_m: f64,
}

/// Human-oriented calibration context attached to every prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneContext {
    pub scene_type: SceneType,
    pub cohort_hint: CohortHint,
    /// Textual explanation of how the confidence was calibrated. Never used
    /// to override the numeric tier.
    pub confidence_calibration: String,
}

/// Provenance of a prediction: which embedding tier answered and which
/// reference index it was matched against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Per-request id for log correlation.
    pub request_id: String,
    /// Diagnostic tag of the embedding backend that produced the query
    /// vector: `geoclip`, `clip`, or `fallback`.
    pub embedding_source: String,
    /// Where the reference index came from (`cache`, `built`, or
    /// `built:lattice_only`).
    pub reference_index_source: String,
    /// Number of image-anchor entries in the reference index.
    pub reference_image_anchors: usize,
}

/// The result of one `predict` call. Created per request; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Absent when the prediction is withheld, so a low-confidence
    /// coordinate can never be mistaken for an actionable one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationEstimate>,

    #[serde(rename = "location_visibility")]
    pub visibility: Visibility,

    /// Calibrated confidence in `[0, 1]`.
    pub confidence: f64,

    #[serde(rename = "confidence_tier")]
    pub tier: ConfidenceTier,

    pub scene_context: SceneContext,

    pub diagnostics: Diagnostics,
}

impl PredictionResult {
    /// Whether the caller received a coordinate it may act on.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.visibility == Visibility::Visible && self.location.is_some()
    }
}
