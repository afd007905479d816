//! CLIP-based embedding backends (cargo feature `clip`).
//!
//! The primary backend pairs a CLIP ViT-B/32 vision tower with a learned
//! geo-projection head and location-encoder MLP; the secondary backend is
//! the bare tower. Weights load from safetensors files under the configured
//! model directory. A missing file is `ModelUnavailable` — the fallback
//! policy decides what happens next, not this module.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::clip::{ClipConfig, ClipModel};

use graticule_core::EMBEDDING_DIM;

use crate::embed::deterministic::{coordinate_features, DeterministicBackend};
use crate::embed::prep::{PreparedImage, INPUT_SIZE};
use crate::embed::{EmbeddingBackend, EmbeddingTier};
use crate::error::EmbedError;

/// Full CLIP ViT-B/32 checkpoint (both towers), HF layout.
pub const TOWER_WEIGHTS: &str = "clip-vit-b32.safetensors";

/// Geo head: image projection + location-encoder MLP.
pub const GEO_HEAD_WEIGHTS: &str = "geoclip-head.safetensors";

fn backend_error(backend: &'static str) -> impl Fn(candle_core::Error) -> EmbedError {
    move |e| EmbedError::Backend {
        backend,
        message: e.to_string(),
    }
}

fn missing(backend: &'static str, path: &Path) -> EmbedError {
    EmbedError::ModelUnavailable {
        backend,
        reason: format!("missing weights: {}", path.display()),
    }
}

/// The shared CLIP vision tower.
pub struct ClipVisionTower {
    model: ClipModel,
    device: Device,
}

impl fmt::Debug for ClipVisionTower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipVisionTower").finish_non_exhaustive()
    }
}

impl ClipVisionTower {
    /// Load the ViT-B/32 checkpoint from `model_dir`.
    pub fn load(backend: &'static str, model_dir: &Path) -> Result<Self, EmbedError> {
        let weights = model_dir.join(TOWER_WEIGHTS);
        if !weights.is_file() {
            return Err(missing(backend, &weights));
        }

        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(&weights, &device)
            .map_err(backend_error(backend))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let config = ClipConfig::vit_base_patch32();
        let model = ClipModel::new(vb, &config).map_err(backend_error(backend))?;

        Ok(Self { model, device })
    }

    /// Pooled, projected image features (dimension [`EMBEDDING_DIM`]).
    pub fn image_features(
        &self,
        backend: &'static str,
        image: &PreparedImage,
    ) -> Result<Vec<f32>, EmbedError> {
        let err = backend_error(backend);
        let size = INPUT_SIZE as usize;
        let pixels = Tensor::from_vec(image.pixels.clone(), (1, 3, size, size), &self.device)
            .map_err(&err)?;
        let features = self.model.get_image_features(&pixels).map_err(&err)?;
        features
            .squeeze(0)
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(&err)
    }
}

/// One learned affine layer pulled out of a safetensors map.
fn linear(
    backend: &'static str,
    tensors: &HashMap<String, Tensor>,
    name: &str,
) -> Result<Linear, EmbedError> {
    let get = |suffix: &str| {
        tensors
            .get(&format!("{name}.{suffix}"))
            .cloned()
            .ok_or_else(|| EmbedError::Backend {
                backend,
                message: format!("geo head tensor {name}.{suffix} missing"),
            })
    };
    Ok(Linear::new(get("weight")?, Some(get("bias")?)))
}

/// The primary vision-geolocation backend (diagnostic tag `geoclip`).
pub struct GeoClipBackend {
    tower: ClipVisionTower,
    image_head: Linear,
    location_w1: Linear,
    location_w2: Linear,
    location_out: Linear,
    device: Device,
}

impl fmt::Debug for GeoClipBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoClipBackend").finish_non_exhaustive()
    }
}

impl GeoClipBackend {
    const TAG: &'static str = "geoclip";

    /// Load tower and geo head from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let tower = ClipVisionTower::load(Self::TAG, model_dir)?;

        let head_path = model_dir.join(GEO_HEAD_WEIGHTS);
        if !head_path.is_file() {
            return Err(missing(Self::TAG, &head_path));
        }
        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(&head_path, &device)
            .map_err(backend_error(Self::TAG))?;

        Ok(Self {
            image_head: linear(Self::TAG, &tensors, "image_head")?,
            location_w1: linear(Self::TAG, &tensors, "location.w1")?,
            location_w2: linear(Self::TAG, &tensors, "location.w2")?,
            location_out: linear(Self::TAG, &tensors, "location.out")?,
            tower,
            device,
        })
    }
}

impl EmbeddingBackend for GeoClipBackend {
    fn tier(&self) -> EmbeddingTier {
        EmbeddingTier::Primary
    }

    fn embed_image(&self, image: &PreparedImage) -> Result<Vec<f32>, EmbedError> {
        let err = backend_error(Self::TAG);
        let features = self.tower.image_features(Self::TAG, image)?;
        let x = Tensor::from_vec(features, (1, EMBEDDING_DIM), &self.device).map_err(&err)?;
        let projected = self.image_head.forward(&x).map_err(&err)?;
        projected
            .squeeze(0)
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(&err)
    }

    fn embed_coordinates(&self, lat: f64, lon: f64) -> Result<Vec<f32>, EmbedError> {
        let err = backend_error(Self::TAG);
        let features = coordinate_features(lat, lon);
        let n = features.len();
        let x = Tensor::from_vec(features, (1, n), &self.device).map_err(&err)?;
        let h1 = self.location_w1.forward(&x).and_then(|t| t.relu()).map_err(&err)?;
        let h2 = self
            .location_w2
            .forward(&h1)
            .and_then(|t| t.relu())
            .map_err(&err)?;
        let out = self.location_out.forward(&h2).map_err(&err)?;
        out.squeeze(0)
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(&err)
    }
}

/// The secondary general-purpose backend (diagnostic tag `clip`).
///
/// Image embeddings come straight from the tower projection; coordinates
/// use the deterministic sphere encoding, since this tier carries no
/// learned location encoder.
pub struct ClipBackend {
    tower: ClipVisionTower,
    location: DeterministicBackend,
}

impl fmt::Debug for ClipBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipBackend").finish_non_exhaustive()
    }
}

impl ClipBackend {
    const TAG: &'static str = "clip";

    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        Ok(Self {
            tower: ClipVisionTower::load(Self::TAG, model_dir)?,
            location: DeterministicBackend::new(),
        })
    }
}

impl EmbeddingBackend for ClipBackend {
    fn tier(&self) -> EmbeddingTier {
        EmbeddingTier::Secondary
    }

    fn embed_image(&self, image: &PreparedImage) -> Result<Vec<f32>, EmbedError> {
        self.tower.image_features(Self::TAG, image)
    }

    fn embed_coordinates(&self, lat: f64, lon: f64) -> Result<Vec<f32>, EmbedError> {
        Ok(self.location.project_coordinates(lat, lon))
    }
}
