use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use graticule_core::cache::BuildSignature;

/// Parameters handed to the ANN graph build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnSettings {
    /// Max neighbors per graph node (`M`).
    #[serde(default = "default_ann_m")]
    pub m: usize,

    #[serde(default = "default_ann_ef_construction")]
    pub ef_construction: usize,

    #[serde(default = "default_ann_ef_search")]
    pub ef_search: usize,
}

impl Default for AnnSettings {
    fn default() -> Self {
        Self {
            m: default_ann_m(),
            ef_construction: default_ann_ef_construction(),
            ef_search: default_ann_ef_search(),
        }
    }
}

fn default_ann_m() -> usize {
    16
}
fn default_ann_ef_construction() -> usize {
    200
}
fn default_ann_ef_search() -> usize {
    96
}

/// Configuration for graticule.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (GRAT_* prefix)
/// 3. Config file (~/.config/graticule/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding cache envelopes and ANN blobs.
    ///
    /// Can be set via:
    /// - CLI: --cache-dir /path
    /// - ENV: GRAT_CACHE_DIR
    /// - Config: cache_dir = "/path"
    /// - Default: platform cache directory + /graticule
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory holding model weight files for the CLIP-based backends.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Optional coordinate-catalog file with population hotspots.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Anchor manifest files (landmark image sets with ground-truth
    /// coordinates). Zero manifests is valid: the build is lattice-only.
    #[serde(default)]
    pub anchor_manifests: Vec<PathBuf>,

    /// Target total number of coordinate-lattice points.
    #[serde(default = "default_lattice_target")]
    pub lattice_target: usize,

    /// Maximum anchors kept per landmark site after diversity curation.
    #[serde(default = "default_anchors_per_site")]
    pub anchors_per_site: usize,

    /// Per-request timeout for anchor image fetches, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub anchor_fetch_timeout_secs: u64,

    /// Retry budget per anchor image fetch (exponential backoff between
    /// attempts); the source is skipped on exhaustion.
    #[serde(default = "default_fetch_retries")]
    pub anchor_fetch_retries: usize,

    #[serde(default)]
    pub ann: AnnSettings,

    /// Optional calibration-threshold override file (TOML).
    #[serde(default)]
    pub calibration_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            model_dir: default_model_dir(),
            catalog_path: None,
            anchor_manifests: Vec::new(),
            lattice_target: default_lattice_target(),
            anchors_per_site: default_anchors_per_site(),
            anchor_fetch_timeout_secs: default_fetch_timeout_secs(),
            anchor_fetch_retries: default_fetch_retries(),
            ann: AnnSettings::default(),
            calibration_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/graticule/config.toml
    /// Reads environment variables with GRAT_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("grat");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;
        Ok(config)
    }

    /// Load configuration with a custom cache directory (the --cache-dir
    /// CLI flag).
    pub fn load_with_cache_dir(cache_dir: PathBuf) -> Result<Self> {
        let mut config = Self::load()?;
        config.cache_dir = cache_dir;
        Ok(config)
    }

    /// Content-derived revision of the configured anchor manifests.
    ///
    /// Feeds the build signature so adding or removing a manifest
    /// invalidates stale caches.
    #[must_use]
    pub fn anchor_revision(&self) -> String {
        if self.anchor_manifests.is_empty() {
            return "none".to_string();
        }
        let mut stems: Vec<String> = self
            .anchor_manifests
            .iter()
            .map(|p| {
                p.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "manifest".to_string())
            })
            .collect();
        stems.sort();
        stems.join("+")
    }

    /// The build signature for a store embedded with the given backend tag.
    #[must_use]
    pub fn build_signature(&self, backend_tag: &str) -> BuildSignature {
        BuildSignature::new(backend_tag, self.lattice_target, self.anchor_revision())
    }

    /// Path of the merged reference envelope for a signature.
    #[must_use]
    pub fn reference_envelope_path(&self, signature: &str) -> PathBuf {
        self.cache_dir
            .join(format!("reference-{}.json.gz", sanitize(signature)))
    }

    /// Path of the intermediate lattice envelope for a signature.
    #[must_use]
    pub fn lattice_envelope_path(&self, signature: &str) -> PathBuf {
        self.cache_dir
            .join(format!("lattice-{}.json.gz", sanitize(signature)))
    }

    /// Path of an intermediate per-source anchor envelope.
    #[must_use]
    pub fn anchor_envelope_path(&self, signature: &str, source_name: &str) -> PathBuf {
        self.cache_dir.join(format!(
            "anchors-{}-{}.json.gz",
            sanitize(signature),
            sanitize(source_name)
        ))
    }

    /// Directory and basename for the ANN graph blob of a signature.
    #[must_use]
    pub fn ann_basename(&self, signature: &str) -> String {
        format!("ann-{}", sanitize(signature))
    }
}

/// Replace path-hostile characters in a signature for use in file names.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Get the default cache directory.
///
/// Returns: platform cache dir + /graticule (e.g. ~/.cache/graticule)
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graticule")
}

/// Get the default model directory.
fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graticule")
        .join("models")
}

fn default_lattice_target() -> usize {
    12_000
}

fn default_anchors_per_site() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_fetch_retries() -> usize {
    3
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/graticule/config.toml
/// - macOS: ~/Library/Application Support/graticule/config.toml
/// - Windows: %APPDATA%\graticule\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graticule")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Graticule Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (GRAT_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Directory holding reference-index cache envelopes and ANN graph blobs
#cache_dir = "/path/to/cache"

# Directory holding model weights for the CLIP-based embedding backends.
# When the weights are absent the engine degrades to the deterministic
# fallback backend and says so in every prediction's diagnostics.
#model_dir = "/path/to/models"

# Coordinate catalog with population hotspots (JSON array of
# {id, label, lat, lon, weight?, category?})
#catalog_path = "/path/to/catalog.json"

# Anchor manifests: landmark image sets with ground-truth coordinates
#anchor_manifests = ["/path/to/landmarks.json"]

# Target number of coordinate-lattice points
lattice_target = 12000

# Anchors kept per landmark site after near-duplicate curation
anchors_per_site = 4
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}
