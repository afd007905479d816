use anyhow::{Context, Result};
use base64::Engine;
use std::io::Read;
use std::path::{Path, PathBuf};

use graticule_etl::Config;
use graticule_search::{GeolocationService, PredictMode};

/// Predict a location for one photograph and print the result as JSON.
pub async fn run_predict(
    config: Config,
    image: PathBuf,
    mode: PredictMode,
    base64_input: bool,
) -> Result<()> {
    let raw = if image == Path::new("-") {
        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("Failed to read image from stdin")?;
        buffer
    } else {
        std::fs::read(&image)
            .with_context(|| format!("Failed to read image: {}", image.display()))?
    };

    let bytes = if base64_input {
        let text = String::from_utf8(raw).context("Base64 input is not valid UTF-8")?;
        base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .context("Failed to decode base64 image data")?
    } else {
        raw
    };

    let service = GeolocationService::from_config(config);
    let result = service.predict(bytes, mode).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
