//! Integration tests for the lattice → anchors → assemble build pipeline.
//!
//! These tests run against local image fixtures and the deterministic
//! embedding backend, so no model weights or network access are required.

use std::path::Path;
use std::sync::Arc;

use graticule_core::cache::CacheEnvelope;
use graticule_etl::{
    build_pipeline, BuildJob, Config, DeterministicBackend, EmbeddingExtractor, FallbackPolicy,
    ReferenceIndexBuilder,
};
use tempfile::TempDir;
use treadle::WorkItem;

fn deterministic_extractor() -> Arc<EmbeddingExtractor> {
    Arc::new(EmbeddingExtractor::new(vec![Arc::new(
        DeterministicBackend::new(),
    )]))
}

fn write_png(path: &Path, shade: u8) {
    let img = image::RgbImage::from_pixel(40, 40, image::Rgb([shade, 128, 255 - shade]));
    img.save(path).expect("write png");
}

fn write_manifest(dir: &Path) -> std::path::PathBuf {
    let a = dir.join("tower-1.png");
    let b = dir.join("tower-2.png");
    write_png(&a, 40);
    write_png(&b, 210);

    let path = dir.join("landmarks.json");
    let manifest = serde_json::json!({
        "name": "landmarks",
        "sites": [{
            "id": "eiffel",
            "label": "Eiffel Tower",
            "lat": 48.8584,
            "lon": 2.2945,
            "images": [a.to_string_lossy(), b.to_string_lossy()]
        }]
    });
    std::fs::write(&path, manifest.to_string()).expect("write manifest");
    path
}

/// Test that the pipeline can be built and wired correctly
#[tokio::test]
async fn test_pipeline_construction() {
    let result = build_pipeline(Config::default(), deterministic_extractor());
    assert!(result.is_ok(), "Pipeline should build successfully");
}

/// Test work item creation
#[test]
fn test_build_job_work_item() {
    let job = BuildJob::new("job-1", std::path::PathBuf::from("/tmp/cache"));
    assert_eq!(job.id(), "job-1");

    let display = format!("{}", job);
    assert!(display.contains("job-1"));
}

/// A full builder run over a manifest with local images produces a merged
/// store with both subsets, persisted under the build signature.
#[tokio::test]
async fn test_builder_end_to_end_with_anchors() {
    let dir = TempDir::new().expect("tempdir");
    let manifest = write_manifest(dir.path());

    let config = Config {
        cache_dir: dir.path().join("cache"),
        lattice_target: 10,
        anchor_manifests: vec![manifest],
        anchors_per_site: 2,
        ..Config::default()
    };

    let extractor = deterministic_extractor();
    let builder = ReferenceIndexBuilder::new(config.clone(), extractor);
    let built = builder.build().await.expect("build");

    assert_eq!(built.store.lattice_count(), 10);
    assert_eq!(built.store.anchor_count(), 2);
    assert_eq!(built.provenance.reference_index_source(), "built");

    // The envelope round-trips under the same signature.
    let envelope = CacheEnvelope::load(
        &config.reference_envelope_path(&built.signature),
        &built.signature,
    )
    .expect("envelope");
    assert_eq!(envelope.vectors.len(), 12);
    assert_eq!(envelope.embedding_source, "fallback");
}

/// The catalog feeds hotspot density into the lattice.
#[tokio::test]
async fn test_builder_uses_catalog_hotspots() {
    let dir = TempDir::new().expect("tempdir");
    let catalog = dir.path().join("catalog.json");
    std::fs::write(
        &catalog,
        r#"[{"id": "paris", "label": "Paris", "lat": 48.85, "lon": 2.35, "weight": 3.0, "category": "urban"}]"#,
    )
    .expect("write catalog");

    let config = Config {
        cache_dir: dir.path().join("cache"),
        lattice_target: 12,
        catalog_path: Some(catalog),
        ..Config::default()
    };

    let builder = ReferenceIndexBuilder::new(config, deterministic_extractor());
    let built = builder.build().await.expect("build");

    assert_eq!(built.store.len(), 12);
    let hotspot_points = built
        .store
        .vectors()
        .iter()
        .filter(|v| v.id.starts_with("lat:hot-urban-paris"))
        .count();
    assert_eq!(hotspot_points, 4, "center plus three ring points");
}

/// The resolved tier drives the signature: the deterministic-only registry
/// always resolves to the fallback tag.
#[test]
fn test_signature_carries_resolved_tier() {
    let extractor = deterministic_extractor();
    let tier = extractor
        .resolve_tier(FallbackPolicy::Accurate)
        .expect("tier");
    assert_eq!(tier.tag(), "fallback");

    let config = Config::default();
    let signature = config.build_signature(tier.tag()).render();
    assert!(signature.contains(":fallback:"));
}
