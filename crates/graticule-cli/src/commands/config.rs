use anyhow::{Context, Result};

use graticule_etl::config::{config_file_path, ensure_config_file};

/// Show the configuration file, creating it first with `--init`.
pub fn run_config(init: bool) -> Result<()> {
    let path = config_file_path();

    if init {
        if ensure_config_file()? {
            println!("Created config file: {}", path.display());
        } else {
            println!("Config file already exists: {}", path.display());
        }
        return Ok(());
    }

    println!("Config file: {}", path.display());
    if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        println!("\n{contents}");
    } else {
        println!("  (not created yet; run `graticule config --init`)");
    }

    Ok(())
}
