//! The deterministic fallback backend (tier tag `fallback`).
//!
//! Produces hash-like feature vectors from simple image statistics and a
//! sinusoidal sphere encoding of coordinates, expanded to the shared
//! dimension through fixed seeded random projections. Always available;
//! exists to keep the system responsive when no model assets are present,
//! never to claim high confidence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use graticule_core::EMBEDDING_DIM;

use crate::embed::prep::{PreparedImage, INPUT_SIZE};
use crate::embed::{EmbeddingBackend, EmbeddingTier};
use crate::error::EmbedError;

const IMAGE_PROJECTION_SEED: u64 = 0x6772_6174_4941_4d47; // "gratIAMG"
const COORD_PROJECTION_SEED: u64 = 0x6772_6174_4c4f_4343; // "gratLOCC"

const GRID_SIDE: usize = 8;
const HISTOGRAM_BINS: usize = 16;

/// Number of raw image statistics before projection.
const IMAGE_FEATURES: usize = 6 + GRID_SIDE * GRID_SIDE + HISTOGRAM_BINS + 2;

/// Harmonic scales for the coordinate encoding.
const COORD_SCALES: [f64; 6] = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0];

/// Number of raw coordinate features before projection.
const COORD_FEATURES: usize = 3 + COORD_SCALES.len() * 8;

/// A fixed random projection from a feature space into the embedding space.
#[derive(Debug)]
struct Projection {
    weights: Vec<f32>,
    in_dim: usize,
}

impl Projection {
    fn new(seed: u64, in_dim: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = (0..in_dim * EMBEDDING_DIM)
            .map(|_| rng.gen_range(-1.0_f32..1.0))
            .collect();
        Self { weights, in_dim }
    }

    fn project(&self, features: &[f32]) -> Vec<f32> {
        debug_assert_eq!(features.len(), self.in_dim);
        let mut out = vec![0.0_f32; EMBEDDING_DIM];
        for (f, &value) in features.iter().enumerate() {
            if value == 0.0 {
                continue;
            }
            let row = &self.weights[f * EMBEDDING_DIM..(f + 1) * EMBEDDING_DIM];
            for (o, &w) in out.iter_mut().zip(row.iter()) {
                *o += value * w;
            }
        }
        out
    }
}

/// Simple channel/grid/histogram/gradient statistics of a prepared image.
fn image_features(image: &PreparedImage) -> Vec<f32> {
    let side = INPUT_SIZE as usize;
    let plane = side * side;
    let mut features = Vec::with_capacity(IMAGE_FEATURES);

    // Per-channel mean and variance.
    for c in 0..3 {
        let channel = image.channel(c);
        let mean = channel.iter().sum::<f32>() / plane as f32;
        let var = channel.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / plane as f32;
        features.push(mean);
        features.push(var);
    }

    // Luminance plane.
    let r = image.channel(0);
    let g = image.channel(1);
    let b = image.channel(2);
    let luma: Vec<f32> = (0..plane)
        .map(|i| 0.299 * r[i] + 0.587 * g[i] + 0.114 * b[i])
        .collect();

    // Downsampled luminance grid.
    let cell = side / GRID_SIDE;
    for gy in 0..GRID_SIDE {
        for gx in 0..GRID_SIDE {
            let mut sum = 0.0_f32;
            for y in 0..cell {
                for x in 0..cell {
                    sum += luma[(gy * cell + y) * side + gx * cell + x];
                }
            }
            features.push(sum / (cell * cell) as f32);
        }
    }

    // Luminance histogram over a fixed range of normalized values.
    let mut histogram = [0.0_f32; HISTOGRAM_BINS];
    for &v in &luma {
        let clamped = v.clamp(-3.0, 3.0);
        let bin = (((clamped + 3.0) / 6.0) * (HISTOGRAM_BINS as f32 - 1.0)).round() as usize;
        histogram[bin.min(HISTOGRAM_BINS - 1)] += 1.0;
    }
    for h in histogram {
        features.push(h / plane as f32);
    }

    // Gradient energy, horizontal and vertical.
    let mut gx_energy = 0.0_f32;
    let mut gy_energy = 0.0_f32;
    for y in 0..side {
        for x in 0..side {
            if x + 1 < side {
                gx_energy += (luma[y * side + x + 1] - luma[y * side + x]).abs();
            }
            if y + 1 < side {
                gy_energy += (luma[(y + 1) * side + x] - luma[y * side + x]).abs();
            }
        }
    }
    features.push(gx_energy / plane as f32);
    features.push(gy_energy / plane as f32);

    features
}

/// Multi-scale sinusoidal encoding of a coordinate on the unit sphere.
///
/// Shared with the secondary CLIP backend, which has no learned location
/// encoder of its own.
pub fn coordinate_features(lat: f64, lon: f64) -> Vec<f32> {
    let phi = lat.to_radians();
    let lambda = lon.to_radians();

    let mut features = Vec::with_capacity(COORD_FEATURES);
    features.push((phi.cos() * lambda.cos()) as f32);
    features.push((phi.cos() * lambda.sin()) as f32);
    features.push(phi.sin() as f32);

    for scale in COORD_SCALES {
        features.push((scale * phi).sin() as f32);
        features.push((scale * phi).cos() as f32);
        features.push((scale * lambda).sin() as f32);
        features.push((scale * lambda).cos() as f32);
        features.push((scale * phi).sin() as f32 * (scale * lambda).cos() as f32);
        features.push((scale * phi).sin() as f32 * (scale * lambda).sin() as f32);
        features.push((scale * phi).cos() as f32 * (scale * lambda).cos() as f32);
        features.push((scale * phi).cos() as f32 * (scale * lambda).sin() as f32);
    }

    features
}

/// The always-available deterministic backend.
#[derive(Debug)]
pub struct DeterministicBackend {
    image_projection: Projection,
    coord_projection: Projection,
}

impl DeterministicBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            image_projection: Projection::new(IMAGE_PROJECTION_SEED, IMAGE_FEATURES),
            coord_projection: Projection::new(COORD_PROJECTION_SEED, COORD_FEATURES),
        }
    }

    /// Project coordinate features into the embedding space. Used directly
    /// by the builder when synthesizing last-resort coverage vectors.
    #[must_use]
    pub fn project_coordinates(&self, lat: f64, lon: f64) -> Vec<f32> {
        self.coord_projection.project(&coordinate_features(lat, lon))
    }
}

impl Default for DeterministicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingBackend for DeterministicBackend {
    fn tier(&self) -> EmbeddingTier {
        EmbeddingTier::Deterministic
    }

    fn embed_image(&self, image: &PreparedImage) -> Result<Vec<f32>, EmbedError> {
        Ok(self.image_projection.project(&image_features(image)))
    }

    fn embed_coordinates(&self, lat: f64, lon: f64) -> Result<Vec<f32>, EmbedError> {
        Ok(self.project_coordinates(lat, lon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graticule_core::vector::cosine_similarity;

    #[test]
    fn test_coordinate_embedding_is_deterministic() {
        let backend = DeterministicBackend::new();
        let a = backend.embed_coordinates(48.85, 2.29).expect("embed");
        let b = DeterministicBackend::new()
            .embed_coordinates(48.85, 2.29)
            .expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_nearby_coordinates_are_more_similar_than_antipodes() {
        let backend = DeterministicBackend::new();
        let paris = backend.embed_coordinates(48.85, 2.29).expect("embed");
        let nearby = backend.embed_coordinates(48.95, 2.40).expect("embed");
        let antipode = backend.embed_coordinates(-48.85, -177.71).expect("embed");

        let near_sim = cosine_similarity(&paris, &nearby);
        let far_sim = cosine_similarity(&paris, &antipode);
        assert!(near_sim > far_sim, "near {near_sim} vs far {far_sim}");
    }

    #[test]
    fn test_image_embedding_depends_on_content() {
        use crate::embed::prep::PreparedImage;

        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let backend = DeterministicBackend::new();

        let dark = PreparedImage {
            pixels: vec![-1.0; 3 * plane],
        };
        let bright = PreparedImage {
            pixels: vec![1.0; 3 * plane],
        };

        let a = backend.embed_image(&dark).expect("embed");
        let b = backend.embed_image(&bright).expect("embed");
        assert_ne!(a, b);
    }
}
