use anyhow::Result;

use graticule_core::cache::CacheEnvelope;
use graticule_etl::{Config, EmbeddingExtractor, FallbackPolicy};

pub fn show_status(config: &Config) -> Result<()> {
    println!("\n📊 Graticule Status\n");
    println!("  Cache directory: {}", config.cache_dir.display());
    println!("  Model directory: {}", config.model_dir.display());

    let extractor = EmbeddingExtractor::with_default_backends(&config.model_dir);
    let tier = match extractor.resolve_tier(FallbackPolicy::Accurate) {
        Ok(tier) => tier,
        Err(e) => {
            println!("  Embedding: unavailable ({e})");
            return Ok(());
        }
    };
    println!("  Embedding tier: {}", tier.tag());

    let signature = config.build_signature(tier.tag()).render();
    println!("  Build signature: {signature}");

    let envelope_path = config.reference_envelope_path(&signature);
    if !envelope_path.exists() {
        println!("  Reference store: not built");
        println!("\n  Run `graticule build` to build the reference index");
        return Ok(());
    }

    match CacheEnvelope::load(&envelope_path, &signature) {
        Ok(envelope) => {
            let built_at = envelope.built_at;
            let store = envelope.into_store()?;
            println!(
                "  Reference store: {} vectors ({} lattice, {} anchors), built {}",
                store.len(),
                store.lattice_count(),
                store.anchor_count(),
                built_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        Err(e) => {
            println!("  Reference store: unusable ({e})");
            println!("\n  Run `graticule build --force` to rebuild");
        }
    }

    Ok(())
}
