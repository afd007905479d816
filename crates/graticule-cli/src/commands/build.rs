use anyhow::{Context, Result};
use std::sync::Arc;

use graticule_etl::{build_pipeline, BuildJob, Config, EmbeddingExtractor, FallbackPolicy};

/// Orchestrate the reference-index build pipeline.
///
/// Steps:
/// 1. Lattice - generate and embed the coordinate lattice
/// 2. Anchors - fetch, embed, and curate landmark image sets (one subtask
///    per manifest)
/// 3. Assemble - merge both subsets into the versioned reference envelope
pub async fn run_build(config: Config, force: bool) -> Result<()> {
    println!("\n🌐 Graticule Reference Index Build\n");
    println!("  Cache directory: {}", config.cache_dir.display());
    println!("  Lattice target: {}", config.lattice_target);
    println!("  Anchor manifests: {}", config.anchor_manifests.len());
    println!();

    let extractor = Arc::new(EmbeddingExtractor::with_default_backends(&config.model_dir));
    let tier = extractor
        .resolve_tier(FallbackPolicy::Accurate)
        .context("No embedding backend available")?;
    let signature = config.build_signature(tier.tag()).render();
    println!("  Embedding tier: {}", tier.tag());
    println!("  Build signature: {signature}\n");

    if force {
        discard_signature_files(&config)?;
    }

    let workflow = build_pipeline(config.clone(), Arc::clone(&extractor))
        .context("Failed to build pipeline")?;

    std::fs::create_dir_all(&config.cache_dir)
        .context("Failed to create cache directory")?;
    let state_path = config.cache_dir.join("pipeline.db");
    let mut store = treadle::SqliteStateStore::open(&state_path)
        .await
        .context("Failed to open pipeline state store")?;

    let work_item = BuildJob::new("build-job", config.cache_dir.clone());

    // Subscribe to events for progress display
    let mut events = workflow.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                treadle::WorkflowEvent::StageStarted { stage, .. } => {
                    println!("  ⏳ [{stage}] Starting...");
                }
                treadle::WorkflowEvent::StageCompleted { stage, .. } => {
                    println!("  ✓ [{stage}] Complete");
                }
                treadle::WorkflowEvent::StageFailed { stage, error, .. } => {
                    eprintln!("  ✗ [{stage}] FAILED: {error}");
                }
                _ => {}
            }
        }
    });

    workflow
        .advance(&work_item, &mut store)
        .await
        .context("Build pipeline failed")?;

    println!("\n✓ Reference index build complete!");
    println!("\nNext steps:");
    println!("  - Run `graticule predict <image>` to geolocate a photo");
    println!("  - Run `graticule status` to inspect the built index");

    Ok(())
}

/// Remove envelopes and ANN blobs so the pipeline rebuilds from scratch.
fn discard_signature_files(config: &Config) -> Result<()> {
    if !config.cache_dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&config.cache_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let stale = name.starts_with("reference-")
            || name.starts_with("lattice-")
            || name.starts_with("anchors-")
            || name.starts_with("ann-");
        if stale {
            log::info!("discarding {}", entry.path().display());
            std::fs::remove_file(entry.path())
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}
